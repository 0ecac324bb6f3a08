use std::collections::HashMap;
use std::sync::OnceLock;

/// utf8_general_ci. Every packet the gateway emits declares this collation.
pub const DEFAULT_COLLATION_ID: u8 = 33;

/// Collation name to id for the collations commonly seen in handshake
/// responses. The gateway never converts charsets; the table exists so logs
/// and tests can name what a client asked for.
pub fn collation_names() -> &'static HashMap<&'static str, u8> {
    static COLLATIONS: OnceLock<HashMap<&'static str, u8>> = OnceLock::new();
    COLLATIONS.get_or_init(|| {
        HashMap::from([
            ("big5_chinese_ci", 1),
            ("latin1_swedish_ci", 8),
            ("ascii_general_ci", 11),
            ("gbk_chinese_ci", 28),
            ("utf8_general_ci", 33),
            ("utf8mb4_general_ci", 45),
            ("utf8mb4_bin", 46),
            ("binary", 63),
            ("utf8mb4_0900_ai_ci", 255),
        ])
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    pub fn test_default_collation() {
        assert_eq!(
            *collation_names().get("utf8_general_ci").unwrap(),
            DEFAULT_COLLATION_ID
        );
    }
}
