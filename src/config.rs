use log::warn;

const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017/todo";
const DEFAULT_PORT: u16 = 5000;

pub struct Config {
    pub mongodb_uri: String,
    pub has_mongo_uri: bool,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let uri = dotenvy::var("MONGODB_URI")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let port = dotenvy::var("PORT").ok();
        Self::from_values(uri, port)
    }

    pub fn with_uri(mongodb_uri: String) -> Self {
        Self {
            mongodb_uri,
            has_mongo_uri: true,
            port: DEFAULT_PORT,
        }
    }

    fn from_values(uri: Option<String>, port: Option<String>) -> Self {
        let port = port
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);
        match uri {
            Some(raw) => Self {
                mongodb_uri: normalize_uri(&raw),
                has_mongo_uri: true,
                port,
            },
            None => {
                warn!("MONGODB_URI is not set, falling back to {DEFAULT_MONGODB_URI}");
                Self {
                    mongodb_uri: DEFAULT_MONGODB_URI.to_string(),
                    has_mongo_uri: false,
                    port,
                }
            }
        }
    }
}

/// Trims the URI, drops a single trailing slash and, when the URI carries no
/// query string, appends the retryable-write options expected by hosted
/// clusters.
fn normalize_uri(raw: &str) -> String {
    let mut uri = raw.trim().to_string();
    if uri.ends_with('/') {
        uri.pop();
    }
    if !uri.contains('?') {
        uri.push_str("?retryWrites=true&w=majority");
    }
    uri
}
