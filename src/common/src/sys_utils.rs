pub mod sys {
    use std::env;

    const KUBERNETES_HOSTNAME_ENV: &str = "SQL_GATEWAY_POD_NAME";

    /// Node identity for metric labels. Inside Kubernetes the pod name is
    /// injected through `SQL_GATEWAY_POD_NAME`; elsewhere the plain
    /// `HOSTNAME` is good enough.
    pub fn hostname() -> String {
        env::var(KUBERNETES_HOSTNAME_ENV)
            .or_else(|_| env::var("HOSTNAME"))
            .unwrap_or_else(|_| "localhost".to_string())
    }
}

#[cfg(test)]
mod test {
    use crate::sys_utils::sys::hostname;

    #[test]
    pub fn test_hostname_not_empty() {
        assert!(!hostname().is_empty());
    }
}
