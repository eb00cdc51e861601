//! Runtime metrics.
//!
//! Tracks request and message activity of every protocol handler. Metrics are
//! grouped per protocol namespace and can be queried by namespace, name and
//! label subset.

mod metric;

pub use metric::{
    Counter, CounterMap, Gauge, GaugeMap, Metric, MetricError, MetricInfo, Sample,
};

use std::sync::Arc;

/// Filter for metric queries.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub namespace: Option<String>,
    /// Fully qualified metric names (`namespace_name`); empty means all.
    pub names: Vec<String>,
    pub labels: Vec<(String, String)>,
}

impl Query {
    pub fn namespace(namespace: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, name: &str, value: &str) -> Self {
        self.labels.push((name.to_string(), value.to_string()));
        self
    }

    fn accepts(&self, sample: &Sample) -> bool {
        if let Some(ns) = &self.namespace {
            if &sample.namespace != ns {
                return false;
            }
        }
        if !self.names.is_empty() && !self.names.iter().any(|n| n == &sample.fq_name) {
            return false;
        }
        self.labels
            .iter()
            .all(|(k, v)| sample.label(k).map(|s| s == v).unwrap_or(false))
    }
}

pub struct AppMonitor {
    pub start_timestamp: Arc<Gauge>,
}

pub struct HttpMonitor {
    pub requests_total: Arc<CounterMap>,
    pub requests_errors_total: Arc<CounterMap>,
    pub last_request: Arc<GaugeMap>,
}

pub struct KafkaMonitor {
    pub messages: Arc<CounterMap>,
    pub last_message: Arc<GaugeMap>,
    pub lags: Arc<GaugeMap>,
    pub requests_errors_total: Arc<CounterMap>,
}

pub struct MailMonitor {
    pub mails: Arc<CounterMap>,
    pub last_mail: Arc<GaugeMap>,
    pub requests_errors_total: Arc<CounterMap>,
}

pub struct LdapMonitor {
    pub requests_total: Arc<CounterMap>,
    pub requests_errors_total: Arc<CounterMap>,
    pub last_request: Arc<GaugeMap>,
}

/// All metrics of a running instance.
pub struct Monitor {
    pub app: AppMonitor,
    pub http: HttpMonitor,
    pub kafka: KafkaMonitor,
    pub mail: MailMonitor,
    pub ldap: LdapMonitor,
    registry: Vec<Arc<dyn Metric>>,
}

impl Monitor {
    /// # Panics
    ///
    /// Panics when a built-in metric name is rejected by prometheus.
    pub fn new() -> Self {
        let mut registry: Vec<Arc<dyn Metric>> = Vec::new();

        macro_rules! register {
            ($ty:ident, $ns:expr, $name:expr, $labels:expr) => {{
                let m = match $ty::new(MetricInfo::new($ns, $name, $labels)) {
                    Ok(m) => Arc::new(m),
                    Err(e) => panic!("metric {}_{}: {e}", $ns, $name),
                };
                registry.push(m.clone());
                m
            }};
        }

        let app = AppMonitor {
            start_timestamp: register!(Gauge, "app", "start_timestamp", &[]),
        };
        let http = HttpMonitor {
            requests_total: register!(CounterMap, "http", "requests_total", &["service", "endpoint"]),
            requests_errors_total: register!(
                CounterMap,
                "http",
                "requests_errors_total",
                &["service", "endpoint"]
            ),
            last_request: register!(GaugeMap, "http", "request_timestamp", &["service", "endpoint"]),
        };
        let kafka = KafkaMonitor {
            messages: register!(CounterMap, "kafka", "messages_total", &["service", "topic"]),
            last_message: register!(GaugeMap, "kafka", "message_timestamp", &["service", "topic"]),
            lags: register!(
                GaugeMap,
                "kafka",
                "consumer_group_lag",
                &["service", "group", "topic", "partition"]
            ),
            requests_errors_total: register!(
                CounterMap,
                "kafka",
                "requests_errors_total",
                &["service", "api"]
            ),
        };
        let mail = MailMonitor {
            mails: register!(CounterMap, "mail", "mails_total", &["service", "sender"]),
            last_mail: register!(GaugeMap, "mail", "mail_timestamp", &["service"]),
            requests_errors_total: register!(
                CounterMap,
                "mail",
                "requests_errors_total",
                &["service", "command"]
            ),
        };
        let ldap = LdapMonitor {
            requests_total: register!(CounterMap, "ldap", "requests_total", &["service", "operation"]),
            requests_errors_total: register!(
                CounterMap,
                "ldap",
                "requests_errors_total",
                &["service", "operation"]
            ),
            last_request: register!(GaugeMap, "ldap", "request_timestamp", &["service"]),
        };

        Self {
            app,
            http,
            kafka,
            mail,
            ldap,
            registry,
        }
    }

    /// Samples accepted by `query`, in registration order.
    pub fn find_all(&self, query: &Query) -> Vec<Sample> {
        self.registry
            .iter()
            .flat_map(|m| m.samples())
            .filter(|s| query.accepts(s))
            .collect()
    }

    /// Reset every metric of a namespace to zero.
    pub fn reset(&self, namespace: &str) {
        for m in self.registry.iter().filter(|m| m.info().namespace == namespace) {
            m.reset();
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Seconds since the epoch as used by the timestamp gauges.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_all_by_namespace() {
        let m = Monitor::new();
        m.kafka.messages.with_label(&["foo", "t"]).inc();
        m.mail.mails.with_label(&["smtp", "alice@foo.bar"]).inc();

        let kafka = m.find_all(&Query::namespace("kafka"));
        assert_eq!(kafka.len(), 1);
        assert_eq!(kafka[0].fq_name, "kafka_messages_total");
    }

    #[test]
    fn test_find_all_by_label() {
        let m = Monitor::new();
        m.http.requests_total.with_label(&["a", "/x"]).inc();
        m.http.requests_total.with_label(&["b", "/x"]).inc();
        let found = m.find_all(&Query::namespace("http").with_label("service", "b"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label("service"), Some("b"));
    }

    #[test]
    fn test_find_all_by_name() {
        let m = Monitor::new();
        m.app.start_timestamp.set(1.0);
        m.ldap.requests_total.with_label(&["d", "bind"]).inc();
        let q = Query {
            names: vec!["app_start_timestamp".to_string()],
            ..Default::default()
        };
        let found = m.find_all(&q);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, 1.0);
    }
}
