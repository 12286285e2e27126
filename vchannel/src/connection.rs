//! Connection configuration shared by every transport.
//!
//! Both types deserialize from the usual `serde` formats so they can be loaded alongside the rest
//! of an application's configuration:
//!
//! ```
//! let conn: vchannel::ConnectionInfo = serde_json::from_str(
//!     r#"{ "userid": "AKIA...", "password": "secret",
//!          "transport_options": { "visibility_timeout": 3600, "region": "us-east-2" } }"#,
//! )
//! .unwrap();
//! assert_eq!(conn.transport_options.visibility_timeout, Some(3600));
//! ```

use std::{collections::HashMap, fmt};

use serde::Deserialize;

#[derive(Clone, Default, Deserialize, PartialEq)]
pub struct ConnectionInfo {
    /// Access key id. When absent the backend's own credential discovery is used.
    #[serde(default)]
    pub userid: Option<String>,
    /// Secret access key paired with `userid`.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub transport_options: TransportOptions,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("userid", &self.userid)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("transport_options", &self.transport_options)
            .finish()
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TransportOptions {
    /// Seconds a received message stays hidden from other consumers. Applied when a queue is
    /// created; `None` leaves the backend default in place.
    #[serde(default)]
    pub visibility_timeout: Option<u32>,
    #[serde(default)]
    pub region: Option<String>,
    /// Overrides the service endpoint, e.g. for a local ElasticMQ.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Prepended to every logical queue name before it is normalized.
    #[serde(default)]
    pub queue_name_prefix: Option<String>,
    /// Seconds the caller's polling loop should sleep after an empty `get`.
    #[serde(default)]
    pub polling_interval: Option<f64>,

    /// Options meant for other transports, kept so one map can serve all of them.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}
