/*!
Build context for proxy MCP images.

The generated image starts from the proxy (stdio -> SSE) image, installs a
docker CLI with whichever package manager the base provides, and at startup
runs the wrapped MCP image as a nested container whose stdio the proxy
serves over SSE. Without a docker socket it serves a small stub instead so
sessions still get a reachable endpoint.
*/
use std::fs;
use std::io;
use std::path::Path;

use super::ProxyMcp;
use crate::errors::McError;
use crate::runtime::ContainerRuntime;

pub const DEFAULT_PROXY_IMAGE: &str = "ghcr.io/sparfenyuk/mcp-proxy:latest";
pub const DOCKER_SOCKET: &str = "/var/run/docker.sock";

pub fn proxy_image_tag(name: &str) -> String {
    format!("mc_mcp_proxy_{name}")
}

const ENTRYPOINT: &str = r#"#!/bin/sh
echo "Starting MCP proxy for $MCP_BASE_IMAGE (command: $MCP_COMMAND) on port $SSE_PORT"

if [ ! -S /var/run/docker.sock ]; then
    echo "ERROR: docker socket not available; serving a fallback MCP endpoint."
    cat > /tmp/fallback_server.py << 'EOF'
import json, sys, time
print(json.dumps({"type": "ready", "message": "Fallback server - Docker socket not available"}))
sys.stdout.flush()
while True:
    line = sys.stdin.readline().strip()
    if line:
        try:
            data = json.loads(line)
            if data.get("type") == "ping":
                print(json.dumps({"type": "pong", "id": data.get("id")}))
            else:
                print(json.dumps({"type": "error", "message": "Docker socket not available"}))
        except Exception:
            print(json.dumps({"type": "error"}))
        sys.stdout.flush()
    time.sleep(1)
EOF
    exec mcp-proxy \
      --sse-port "$SSE_PORT" \
      --sse-host "$SSE_HOST" \
      --allow-origin "$ALLOW_ORIGIN" \
      --pass-environment \
      -- \
      python /tmp/fallback_server.py
    exit 1
fi

echo "Pulling base MCP image: $MCP_BASE_IMAGE"
docker pull "$MCP_BASE_IMAGE" || true

CMD="${MCP_COMMAND:-}"
echo "Running MCP server from $MCP_BASE_IMAGE with command: $CMD"

# stdio stays attached (no -d) so mcp-proxy can relay it
exec mcp-proxy \
  --sse-port "$SSE_PORT" \
  --sse-host "$SSE_HOST" \
  --allow-origin "$ALLOW_ORIGIN" \
  --pass-environment \
  -- \
  docker run --rm -i "$MCP_BASE_IMAGE" $CMD
"#;

pub fn render_entrypoint() -> &'static str {
    ENTRYPOINT
}

// Double-quoted Dockerfile ENV value.
fn quote_env(v: &str) -> String {
    let escaped = v.replace('\\', "\\\\").replace('"', "\\\"").replace('$', "\\$");
    format!("\"{escaped}\"")
}

pub fn render_dockerfile(p: &ProxyMcp) -> String {
    let o = &p.proxy_options;
    let mut s = String::new();
    s.push_str(&format!("FROM {}\n\n", p.proxy_image));
    s.push_str("USER root\n");
    s.push_str(
        "RUN (apt-get update && apt-get install -y docker.io) || \\\n    \
         (apt-get update && apt-get install -y docker-ce-cli) || \\\n    \
         (apk add --no-cache docker-cli) || \\\n    \
         (yum install -y docker) || \\\n    \
         echo \"WARNING: could not install a docker CLI; the fallback MCP server will be used\"\n\n",
    );
    s.push_str(&format!("ENV MCP_BASE_IMAGE={}\n", quote_env(&p.base_image)));
    s.push_str(&format!("ENV MCP_COMMAND={}\n", quote_env(&p.command)));
    s.push_str(&format!("ENV SSE_PORT={}\n", o.sse_port));
    s.push_str(&format!("ENV SSE_HOST={}\n", quote_env(&o.sse_host)));
    s.push_str(&format!("ENV ALLOW_ORIGIN={}\n", quote_env(&o.allow_origin)));
    s.push_str("ENV DEBUG=1\n");
    for (k, v) in &p.env {
        s.push_str(&format!("ENV {k}={}\n", quote_env(v)));
    }
    s.push_str("\nCOPY entrypoint.sh /entrypoint.sh\n");
    s.push_str("RUN chmod +x /entrypoint.sh\n");
    s.push_str("ENTRYPOINT [\"/entrypoint.sh\"]\n");
    s
}

/// Write `Dockerfile` and `entrypoint.sh` into `dir`.
pub fn write_build_context(dir: &Path, p: &ProxyMcp) -> io::Result<()> {
    fs::write(dir.join("Dockerfile"), render_dockerfile(p))?;
    let ep = dir.join("entrypoint.sh");
    fs::write(&ep, render_entrypoint())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&ep, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Build the proxy image for `p` in a scratch directory and return its tag.
pub fn build_proxy_image(rt: &dyn ContainerRuntime, p: &ProxyMcp) -> Result<String, McError> {
    let dir = tempfile::tempdir()?;
    write_build_context(dir.path(), p)?;
    let tag = proxy_image_tag(&p.name);
    tracing::info!(mcp = %p.name, image = %tag, "building proxy image");
    rt.build_image(dir.path(), &tag)?;
    Ok(tag)
}
