use std::env;
use std::sync::OnceLock;
use uuid::Uuid;

static INSTANCE_ID: OnceLock<String> = OnceLock::new();

/// 当前进程的实例标识，格式 `{host}-{pid}-{random8}`，进程内只生成一次
pub fn instance_id() -> &'static str {
    INSTANCE_ID.get_or_init(|| build_instance_id(&host_name(), std::process::id()))
}

pub fn build_instance_id(host: &str, pid: u32) -> String {
    format!("{}-{}-{}", host, pid, random_token())
}

/// 8 位十六进制随机串
fn random_token() -> String {
    let simple = Uuid::new_v4().simple().to_string();
    simple[..8].to_string()
}

fn host_name() -> String {
    // 容器内优先使用 HOSTNAME
    if let Ok(host) = env::var("HOSTNAME") {
        if !host.trim().is_empty() {
            return host.trim().to_string();
        }
    }
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_is_cached() {
        assert_eq!(instance_id(), instance_id());
    }

    #[test]
    fn test_instance_id_contains_pid() {
        let pid = std::process::id().to_string();
        assert!(instance_id().contains(&format!("-{}-", pid)));
    }

    #[test]
    fn test_build_instance_id_format() {
        let id = build_instance_id("web-1", 4242);
        assert!(id.starts_with("web-1-4242-"));

        let token = id.rsplit('-').next().unwrap();
        assert_eq!(token.len(), 8);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_build_instance_id_is_unique() {
        assert_ne!(build_instance_id("web-1", 1), build_instance_id("web-1", 1));
    }
}
