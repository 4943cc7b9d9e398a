pub mod bootstrap;
pub mod config;
pub mod diary;
pub mod http;
pub mod protocol;
pub mod reporter;
pub mod session;
pub mod transport;
pub mod types;

/// Page whose response carries the `pstk` session cookie.
pub const SESSION_PAGE_URL: &str = "https://www.bet365.com/defaultapi/sports-configuration";

/// Odds distribution WebSocket endpoint.
pub const FEED_WS_URL: &str = "wss://premws-pt1.365lpodds.com/zap/";

/// Topics subscribed to once the server signals it is ready, in send order.
pub const DEFAULT_TOPICS: [&str; 5] = [
    "__host",
    "CONFIG_1_3",
    "LHInPlay_1_3",
    "Media_l1_Z3",
    "XI_1_3",
];
