use std::time::{Duration, SystemTime};

/// Short random session id: 8 lowercase hex characters.
pub fn create_session_id() -> String {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        return buf.iter().map(|b| format!("{b:02x}")).collect();
    }
    fallback_id()
}

// Compose a short, mostly-unique id from time and pid when the OS RNG is unavailable
fn fallback_id() -> String {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let pid = std::process::id() as u128;
    let mix = now.as_nanos() ^ (pid << 16);
    format!("{:08x}", (mix & 0xffff_ffff) as u32)
}
