mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{paths, session_manager, session_manager_with_env, FakeRuntime};
use mcontainer::mcp::dedicated_network;
use mcontainer::project::{project_hash, project_identifier};
use mcontainer::runtime::VolumeMount;
use mcontainer::session::{LABEL_SESSION_ID, LABEL_SESSION_NAME};
use mcontainer::{ContainerRuntime, CreateRequest, McError, Session, SessionStatus};

fn setup() -> (tempfile::TempDir, Arc<FakeRuntime>, mcontainer::McPaths) {
    let td = tempfile::tempdir().expect("tmpdir");
    let p = paths(td.path());
    (td, Arc::new(FakeRuntime::new()), p)
}

fn goose() -> CreateRequest {
    CreateRequest::new("goose")
}

#[test]
fn int_create_goose_without_project() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);

    let s = mgr.create(&goose()).expect("create");
    assert_eq!(s.id.len(), 8);
    assert_eq!(s.name, format!("mc-{}", s.id));
    assert_eq!(s.status, SessionStatus::Running);
    assert_eq!(s.driver, "goose");
    assert!(s.project.is_none());

    let cid = s.container_id.clone().expect("container id");
    assert!(rt.members("mc-network").contains(&cid));
    assert_eq!(rt.aliases("mc-network", &cid), vec![s.name.clone()]);

    // The working directory keys the persistent config.
    let root = p
        .projects_dir()
        .join(project_hash(&project_identifier(None)))
        .join("config");
    assert!(root.join("goose").is_dir());
    assert!(root.join("goose-app").is_dir());
    assert!(root.join("goose-config").is_dir());

    let listed = mgr.list().expect("list");
    let found = listed.iter().find(|x| x.id == s.id).expect("listed");
    assert_eq!(found.status, SessionStatus::Running);
    assert_eq!(found.name, s.name);
}

#[test]
fn int_create_records_container_shape() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    let s = mgr.create(&goose()).expect("create");
    let cid = s.container_id.clone().expect("cid");
    let spec = rt.spec(&cid).expect("spec");

    assert_eq!(spec.image, "monadical/mc-goose:latest");
    assert_eq!(rt.pulled_images(), vec!["monadical/mc-goose:latest".to_string()]);
    assert_eq!(spec.entrypoint.as_deref(), Some("/mc-init.sh"));
    assert_eq!(spec.command, vec!["/bin/bash".to_string()]);
    assert!(spec.tty && spec.stdin_open);
    assert_eq!(spec.labels[LABEL_SESSION_ID], s.id);
    assert_eq!(spec.labels[LABEL_SESSION_NAME], s.name);
    assert!(spec.volumes.iter().any(|v| v.container == "/mc-config"));

    assert_eq!(spec.env["MC_CONFIG_DIR"], "/mc-config");
    assert_eq!(spec.env["MC_DRIVER_CONFIG_DIR"], "/mc-config/goose");
    assert_eq!(spec.env["MC_INIT_COMMAND"], "/entrypoint.sh");
    assert_eq!(spec.env["MC_NO_SHELL"], "false");
    assert_eq!(spec.env["MCP_COUNT"], "0");
    assert_eq!(
        spec.env["MC_PERSISTENT_LINKS"],
        "/app/.goose:/mc-config/goose-app:directory;/home/mcuser/.config/goose:/mc-config/goose-config:directory"
    );

    // Both driver ports are published to host ports.
    assert_eq!(s.ports.len(), 2);
    assert!(s.ports.contains_key(&8000));
    assert!(s.ports.contains_key(&22));

    let stored = mgr.store().get(&s.id).expect("store").expect("record");
    assert_eq!(stored, s);
}

#[test]
fn int_two_creates_yield_distinct_sessions() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    let mut a = goose();
    a.name = Some("first".into());
    let mut b = goose();
    b.name = Some("second".into());

    let s1 = mgr.create(&a).expect("first");
    let s2 = mgr.create(&b).expect("second");
    assert_ne!(s1.id, s2.id);
    assert_ne!(s1.container_id, s2.container_id);

    let ids: Vec<String> = mgr.list().expect("list").into_iter().map(|s| s.id).collect();
    assert!(ids.contains(&s1.id));
    assert!(ids.contains(&s2.id));
}

#[test]
fn int_unknown_driver_fails_before_runtime_work() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    let err = mgr.create(&CreateRequest::new("nope")).expect_err("unknown driver");
    assert!(matches!(err, McError::DriverNotFound(ref n) if n == "nope"));
    assert!(rt.containers().is_empty());
    assert!(!rt.network_exists_now("mc-network"));
}

#[test]
fn int_unknown_mcp_aborts_create() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    let mut req = goose();
    req.mcps = vec!["missing".into()];
    let err = mgr.create(&req).expect_err("unknown mcp");
    assert!(matches!(err, McError::McpNotFound(_)));
    assert!(rt.containers().is_empty());
    assert!(mgr.store().all().expect("store").is_empty());
}

#[test]
fn int_start_failure_removes_container_and_keeps_store_clean() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    rt.fail_on("start_container");
    assert!(mgr.create(&goose()).is_err());
    assert!(rt.containers().is_empty());
    assert!(mgr.store().all().expect("store").is_empty());
}

#[test]
fn int_network_join_failure_is_not_fatal() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    let mut req = goose();
    req.networks = vec!["absent-net".into()];
    let s = mgr.create(&req).expect("created despite join failure");
    assert_eq!(s.status, SessionStatus::Running);
    assert!(rt.calls().iter().any(|c| c == "connect_network absent-net"));
}

#[test]
fn int_environment_layering() {
    let (_td, rt, p) = setup();
    let mgr = session_manager_with_env(
        &rt,
        &p,
        &[("OPENAI_API_KEY", "host-openai"), ("ANTHROPIC_API_KEY", "host-anthropic")],
    );
    let mut req = goose();
    req.environment = BTreeMap::from([
        ("ANTHROPIC_API_KEY".to_string(), "caller-anthropic".to_string()),
        ("MC_CONFIG_DIR".to_string(), "/elsewhere".to_string()),
    ]);
    req.uid = Some(1234);
    req.gid = Some(4321);
    req.ssh = true;
    req.model = Some("anthropic/claude-3-5-sonnet".into());
    req.run_command = Some("goose session".into());
    req.no_shell = true;

    let s = mgr.create(&req).expect("create");
    let env = &s.environment;
    assert_eq!(env["OPENAI_API_KEY"], "host-openai");
    assert_eq!(env["ANTHROPIC_API_KEY"], "caller-anthropic");
    assert_eq!(env["MC_CONFIG_DIR"], "/mc-config");
    assert_eq!(env["MC_USER_ID"], "1234");
    assert_eq!(env["MC_GROUP_ID"], "4321");
    assert_eq!(env["MC_SSH_ENABLED"], "true");
    assert_eq!(env["MC_MODEL"], "claude-3-5-sonnet");
    assert_eq!(env["MC_PROVIDER"], "anthropic");
    assert_eq!(env["MC_RUN_COMMAND"], "goose session");
    assert_eq!(env["MC_NO_SHELL"], "true");
    assert_eq!(s.uid, Some(1234));
}

#[test]
fn int_local_project_is_mounted_and_explicit_app_volume_wins() {
    let (td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    let project = td.path().join("proj");
    std::fs::create_dir_all(&project).expect("mkdir");
    let canonical = std::fs::canonicalize(&project).expect("canon");

    let mut req = goose();
    req.project = Some(project.display().to_string());
    let s = mgr.create(&req).expect("create");
    let spec = rt.spec(s.container_id.as_deref().expect("cid")).expect("spec");
    let app: Vec<&VolumeMount> = spec.volumes.iter().filter(|v| v.container == "/app").collect();
    assert_eq!(app.len(), 1);
    assert_eq!(app[0].host, canonical.display().to_string());
    assert!(!spec.env.contains_key("MC_PROJECT_URL"));

    let other = td.path().join("other");
    std::fs::create_dir_all(&other).expect("mkdir");
    let mut req = goose();
    req.project = Some(project.display().to_string());
    req.volumes = vec![VolumeMount::new(other.display().to_string(), "/app")];
    let s = mgr.create(&req).expect("create");
    let spec = rt.spec(s.container_id.as_deref().expect("cid")).expect("spec");
    let app: Vec<&VolumeMount> = spec.volumes.iter().filter(|v| v.container == "/app").collect();
    assert_eq!(app.len(), 1);
    assert_eq!(app[0].host, other.display().to_string());

    let mut req = goose();
    req.project = Some(project.display().to_string());
    req.mount_local = false;
    let s = mgr.create(&req).expect("create");
    let spec = rt.spec(s.container_id.as_deref().expect("cid")).expect("spec");
    assert!(spec.volumes.iter().all(|v| v.container != "/app"));
}

#[test]
fn int_remote_project_is_cloned_not_mounted() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    let url = "https://github.com/example/repo.git";
    let mut req = goose();
    req.project = Some(url.into());
    let s = mgr.create(&req).expect("create");
    let spec = rt.spec(s.container_id.as_deref().expect("cid")).expect("spec");
    assert_eq!(spec.env["MC_PROJECT_URL"], url);
    assert!(spec.volumes.iter().all(|v| v.container != "/app"));
    assert_eq!(s.project.as_deref(), Some(url));
    assert!(p.projects_dir().join(project_hash(url)).join("config").is_dir());
}

#[test]
fn int_close_unknown_id_is_false_and_store_unchanged() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    mgr.create(&goose()).expect("create");
    let before = mgr.store().all().expect("before");
    assert!(!mgr.close("deadbeef"));
    assert_eq!(mgr.store().all().expect("after"), before);
}

#[test]
fn int_close_stops_removes_and_forgets() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    let s = mgr.create(&goose()).expect("create");
    assert!(mgr.close(&s.id));
    assert!(rt.containers().is_empty());
    assert!(mgr.store().get(&s.id).expect("store").is_none());
    assert!(mgr.list().expect("list").is_empty());
}

#[test]
fn int_close_all_skips_sessions_removed_out_of_band() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    let sessions: Vec<Session> = (0..4).map(|_| mgr.create(&goose()).expect("create")).collect();
    rt.remove_out_of_band(sessions[1].container_id.as_deref().expect("cid"));

    let seen = AtomicUsize::new(0);
    let (count, any) = mgr.close_all(&|_s: &Session, ok: bool| {
        assert!(ok);
        seen.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(count, 3);
    assert!(any);
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert!(rt.containers().is_empty());
}

#[test]
fn int_close_all_reports_individual_failures() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    let a = mgr.create(&goose()).expect("a");
    let _b = mgr.create(&goose()).expect("b");
    rt.fail_on(&format!("stop_container:{}", a.container_id.as_deref().expect("cid")));

    let failures = AtomicUsize::new(0);
    let (count, any) = mgr.close_all(&|_s: &Session, ok: bool| {
        if !ok {
            failures.fetch_add(1, Ordering::SeqCst);
        }
    });
    assert_eq!(count, 1);
    assert!(any);
    assert_eq!(failures.load(Ordering::SeqCst), 1);
}

#[test]
fn int_close_all_with_nothing_running() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    assert_eq!(mgr.close_all(&|_s: &Session, _ok: bool| {}), (0, false));
}

#[test]
fn int_list_maps_runtime_status() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    let s = mgr.create(&goose()).expect("create");
    rt.stop_out_of_band(s.container_id.as_deref().expect("cid"));
    let listed = mgr.list().expect("list");
    assert_eq!(listed[0].status, SessionStatus::Stopped);
    assert!(listed[0].ports.is_empty());
}

#[test]
fn int_connect_paths() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);

    assert!(matches!(mgr.connect("deadbeef"), Err(McError::SessionNotFound(_))));

    let s = mgr.create(&goose()).expect("create");
    let cid = s.container_id.clone().expect("cid");
    match mgr.connect(&s.id) {
        Err(McError::Runtime(_)) => {}
        other => panic!("expected launch failure from fake terminal, got {other:?}"),
    }
    assert!(rt
        .calls()
        .iter()
        .any(|c| c == &format!("exec_interactive {cid} bash -l")));

    rt.stop_out_of_band(&cid);
    assert!(matches!(
        mgr.connect(&s.id),
        Err(McError::SessionNotRunning { ref status, .. }) if status == "exited"
    ));
}

#[test]
fn int_connect_purges_record_of_vanished_container() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    let s = mgr.create(&goose()).expect("create");
    rt.remove_out_of_band(s.container_id.as_deref().expect("cid"));
    assert!(matches!(mgr.connect(&s.id), Err(McError::SessionNotFound(_))));
    assert!(mgr.store().get(&s.id).expect("store").is_none());
}

#[test]
fn int_session_logs() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    assert!(mgr.logs("deadbeef", None).is_none());
    let mut sink = Vec::new();
    assert!(!mgr.follow_logs("deadbeef", &mut sink));

    let s = mgr.create(&goose()).expect("create");
    rt.set_logs(s.container_id.as_deref().expect("cid"), "one\ntwo\nthree\n");
    assert_eq!(mgr.logs(&s.id, Some(2)).as_deref(), Some("two\nthree\n"));
    assert!(mgr.follow_logs(&s.id, &mut sink));
    assert_eq!(String::from_utf8(sink).expect("utf8"), "one\ntwo\nthree\n");
}

#[test]
fn int_init_logs_complete_and_in_progress() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    assert!(mgr.init_logs("deadbeef").is_none());

    let s = mgr.create(&goose()).expect("create");
    let check = "sh -c grep -q 'INIT_COMPLETE=true' /init.status";
    rt.set_exec("cat /init.log", 0, "init done\n");
    rt.set_exec(check, 0, "");
    let log = mgr.init_logs(&s.id).expect("log");
    assert!(log.complete);
    assert_eq!(log.text, "init done\n");

    rt.set_exec(check, 1, "");
    rt.set_exec("tail -f /init.log", 0, "still going\n");
    assert!(!mgr.init_logs(&s.id).expect("log").complete);
    let mut out = Vec::new();
    assert!(mgr.follow_init_logs(&s.id, &mut out));
    assert_eq!(String::from_utf8(out).expect("utf8"), "still going\n");
}

#[test]
fn int_prune_stale_drops_orphaned_records() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    let keep = mgr.create(&goose()).expect("keep");
    let gone = mgr.create(&goose()).expect("gone");
    rt.remove_out_of_band(gone.container_id.as_deref().expect("cid"));

    assert_eq!(mgr.prune_stale().expect("prune"), vec![gone.id.clone()]);
    let remaining = mgr.store().all().expect("store");
    assert!(remaining.contains_key(&keep.id));
    assert!(!remaining.contains_key(&gone.id));
    assert!(mgr.prune_stale().expect("again").is_empty());
}

#[test]
fn int_extra_networks_join_after_dedicated_mcp_networks() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    mgr.mcps()
        .add_docker("fetch", "mcp/fetch", "", BTreeMap::new())
        .expect("add");
    rt.create_network("team-net").expect("network");

    let mut req = goose();
    req.mcps = vec!["fetch".into()];
    req.networks = vec!["team-net".into()];
    let s = mgr.create(&req).expect("create");
    let cid = s.container_id.clone().expect("cid");

    let joins: Vec<String> = rt
        .calls()
        .into_iter()
        .skip_while(|c| !c.starts_with(&format!("start_container {cid}")))
        .filter(|c| c.starts_with("connect_network "))
        .collect();
    assert_eq!(
        joins,
        vec![
            format!("connect_network {}", dedicated_network("fetch")),
            "connect_network team-net".to_string(),
        ]
    );
    assert_eq!(rt.aliases("team-net", &cid), vec![s.name.clone()]);
    assert_eq!(
        rt.aliases(&dedicated_network("fetch"), &cid),
        vec![s.name.clone()]
    );
}

#[test]
fn int_remote_mcp_is_exposed_through_environment_only() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    mgr.mcps()
        .add_remote(
            "ctx7",
            "https://mcp.context7.com/sse",
            BTreeMap::from([("Authorization".to_string(), "Bearer x".to_string())]),
        )
        .expect("add");

    let mut req = goose();
    req.mcps = vec!["ctx7".into(), "ctx7".into()];
    let s = mgr.create(&req).expect("create");
    assert_eq!(s.mcps, vec!["ctx7".to_string()]);
    assert_eq!(s.environment["MCP_COUNT"], "1");
    assert_eq!(s.environment["MCP_NAMES"], "[\"ctx7\"]");
    assert_eq!(s.environment["MCP_0_TYPE"], "remote");
    assert_eq!(s.environment["MCP_0_NAME"], "ctx7");
    assert_eq!(s.environment["MCP_0_URL"], "https://mcp.context7.com/sse");
    assert_eq!(
        s.environment["MCP_0_HEADERS"],
        "{\"Authorization\":\"Bearer x\"}"
    );

    // Only the session container exists.
    assert_eq!(rt.containers().len(), 1);
    assert!(!rt.network_exists_now(&dedicated_network("ctx7")));
}

#[test]
fn int_failing_mcp_is_dropped_from_session() {
    let (_td, rt, p) = setup();
    let mgr = session_manager(&rt, &p);
    mgr.mcps()
        .add_docker("fetch", "mcp/fetch", "", BTreeMap::new())
        .expect("fetch");
    mgr.mcps()
        .add_remote("ctx7", "https://mcp.context7.com/sse", BTreeMap::new())
        .expect("ctx7");
    rt.fail_on("pull_image:mcp/fetch");

    let mut req = goose();
    req.mcps = vec!["fetch".into(), "ctx7".into()];
    let s = mgr.create(&req).expect("create");
    assert_eq!(s.mcps, vec!["ctx7".to_string()]);
    assert_eq!(s.environment["MCP_COUNT"], "1");
    assert_eq!(s.environment["MCP_0_NAME"], "ctx7");

    let cid = s.container_id.expect("cid");
    assert_eq!(rt.spec(&cid).expect("spec").labels["mc.mcps"], "ctx7");
    assert!(rt
        .calls()
        .iter()
        .all(|c| !c.starts_with(&format!("connect_network {}", dedicated_network("fetch")))));
}
