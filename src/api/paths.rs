//! All Paths are recorded here for use throughout this codebase
pub mod base {
    pub const ROOT: &str = "/";
    pub const HEALTH: &str = "/health";
    pub const ABOUT: &str = "/about";
}

pub mod atlas {
    pub const STATUS: &str = "/api/status";
    pub const ECHO: &str = "/api/echo";
    pub const TOKEN: &str = "/api/token";
    pub const KEY: &str = "/api/key";
    pub const CHILD_MAPS: &str = "/api/childmaps";
    pub const PEERS: &str = "/api/peers";
}

pub mod captcha {
    /// `<id>.png` or `<id>.wav`
    pub const CHALLENGE: &str = "/captcha/:file";
}

pub mod nodes {
    pub const NODE: &str = "/api/node";
    pub const UPDATE_NODE: &str = "/api/updatenode";
    pub const DELETE_NODE: &str = "/api/deletenode";
    pub const VERIFY: &str = "/api/verify";
    pub const ALL: &str = "/api/all";
    pub const MESSAGE: &str = "/api/message";
}

/// Normalize a configured URL prefix to the form `nest` expects:
/// a leading slash, no trailing slash, or empty for none.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix("map"), "/map");
        assert_eq!(normalize_prefix("/map/"), "/map");
    }
}
