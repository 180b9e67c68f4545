//! Per-scrape metric storage and rendering.
use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::formatting::{sanitize_label_value, write_help_line, write_metric_line, write_type_line};

/// Kind of an exported metric.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MetricKind {
    /// A value that can go up and down.
    Gauge,
    /// A monotonically increasing value.
    Counter,
}

impl MetricKind {
    /// The name used on `# TYPE` lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// Static description of an exported metric.
#[derive(Debug, Eq, PartialEq)]
pub struct MetricDef {
    /// Fully qualified metric name.
    pub name: &'static str,
    /// Help text.
    pub help: &'static str,
    /// Metric kind.
    pub kind: MetricKind,
}

/// An ordered set of labels.
///
/// Labels are rendered in the order they were given.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct LabelSet {
    labels: Vec<(&'static str, String)>,
}

impl LabelSet {
    /// Creates a label set from `(key, value)` pairs.
    pub fn from_pairs(labels: Vec<(&'static str, String)>) -> Self {
        Self { labels }
    }

    /// Returns `true` if there are no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Gets the value of a label, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.labels.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str())
    }

    /// Iterates over the `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.labels.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Renders each label as `key="value"`, with the value escaped.
    pub fn to_strings(&self) -> impl Iterator<Item = String> + '_ {
        self.labels.iter().map(|(k, v)| format!("{}=\"{}\"", k, sanitize_label_value(v)))
    }
}

/// A single normalized metric value.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    /// The metric this value belongs to.
    pub def: &'static MetricDef,
    /// The value.
    pub value: f64,
    /// Labels identifying the series.
    pub labels: LabelSet,
}

impl Observation {
    /// Creates an observation.
    pub fn new(def: &'static MetricDef, value: f64, labels: LabelSet) -> Self {
        Self { def, value, labels }
    }
}

/// Destination for observations produced during a scrape.
///
/// Implementations must accept writes from many tasks at once without losing any.
pub trait MetricSink: Send + Sync {
    /// Records one observation.
    fn emit(&self, observation: Observation);

    /// Records a batch of observations.
    ///
    /// The default implementation emits them one by one.
    fn emit_all(&self, observations: Vec<Observation>) {
        for observation in observations {
            self.emit(observation);
        }
    }
}

struct Family {
    def: &'static MetricDef,
    series: BTreeMap<LabelSet, f64>,
}

/// Collects the observations of one scrape and renders them in the text exposition format.
///
/// A `Registry` is meant to live for a single scrape, so series from different scrapes are never
/// mixed. Writing the same metric and label set twice keeps the latest value.
#[derive(Default)]
pub struct Registry {
    families: Mutex<BTreeMap<&'static str, Family>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(families: &mut BTreeMap<&'static str, Family>, observation: Observation) {
        let family = families
            .entry(observation.def.name)
            .or_insert_with(|| Family { def: observation.def, series: BTreeMap::new() });
        family.series.insert(observation.labels, observation.value);
    }

    /// Number of distinct series recorded.
    pub fn len(&self) -> usize {
        self.families.lock().values().map(|f| f.series.len()).sum()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets the value of a series, if it was recorded.
    pub fn get(&self, name: &str, labels: &LabelSet) -> Option<f64> {
        self.families.lock().get(name).and_then(|f| f.series.get(labels).copied())
    }

    /// Gets every series recorded for a metric.
    pub fn series(&self, name: &str) -> Vec<(LabelSet, f64)> {
        self.families
            .lock()
            .get(name)
            .map(|f| f.series.iter().map(|(l, v)| (l.clone(), *v)).collect())
            .unwrap_or_default()
    }

    /// Renders all recorded series.
    ///
    /// Metrics are sorted by name and series by labels, so the same observations always render
    /// the same way.
    pub fn render(&self) -> String {
        let families = self.families.lock();
        let mut output = String::new();

        for (name, family) in families.iter() {
            write_help_line(&mut output, name, family.def.help);
            write_type_line(&mut output, name, family.def.kind.as_str());
            for (labels, value) in &family.series {
                write_metric_line(&mut output, name, labels, *value);
            }
            output.push('\n');
        }

        output
    }
}

impl MetricSink for Registry {
    fn emit(&self, observation: Observation) {
        let mut families = self.families.lock();
        Self::insert(&mut families, observation);
    }

    fn emit_all(&self, observations: Vec<Observation>) {
        let mut families = self.families.lock();
        for observation in observations {
            Self::insert(&mut families, observation);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::{LabelSet, MetricDef, MetricKind, MetricSink, Observation, Registry};

    static UP: MetricDef =
        MetricDef { name: "test_up", help: "Whether it is up.", kind: MetricKind::Gauge };
    static INFO: MetricDef =
        MetricDef { name: "test_info", help: "Static \"info\".", kind: MetricKind::Counter };

    fn labels(id: &str) -> LabelSet {
        LabelSet::from_pairs(vec![("id", id.to_string()), ("rack", "r\"1".to_string())])
    }

    #[test]
    fn test_render_sorted() {
        let registry = Registry::new();
        registry.emit(Observation::new(&UP, 0.0, labels("b")));
        registry.emit(Observation::new(&UP, 1.0, labels("a")));
        registry.emit(Observation::new(&INFO, 1.0, labels("a")));

        let expected = concat!(
            "# HELP test_info Static \"info\".\n",
            "# TYPE test_info counter\n",
            "test_info{id=\"a\",rack=\"r\\\"1\"} 1\n",
            "\n",
            "# HELP test_up Whether it is up.\n",
            "# TYPE test_up gauge\n",
            "test_up{id=\"a\",rack=\"r\\\"1\"} 1\n",
            "test_up{id=\"b\",rack=\"r\\\"1\"} 0\n",
            "\n",
        );
        assert_eq!(registry.render(), expected);
    }

    #[test]
    fn test_last_write_wins() {
        let registry = Registry::new();
        registry.emit(Observation::new(&UP, 1.0, labels("a")));
        registry.emit(Observation::new(&UP, 0.0, labels("a")));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("test_up", &labels("a")), Some(0.0));
    }

    #[test]
    fn test_empty_registry_renders_nothing() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.render(), "");
    }

    #[test]
    fn test_concurrent_writers() {
        let registry = Arc::new(Registry::new());

        let handles = (0..8)
            .map(|t| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        let id = format!("{t}-{i}");
                        if i % 2 == 0 {
                            registry.emit(Observation::new(&UP, 1.0, labels(&id)));
                        } else {
                            registry.emit_all(vec![Observation::new(&INFO, 1.0, labels(&id))]);
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 800);
        assert_eq!(registry.series("test_up").len(), 400);
        assert_eq!(registry.series("test_info").len(), 400);
    }

    #[test]
    fn test_label_set_accessors() {
        let set = labels("a");
        assert_eq!(set.get("id"), Some("a"));
        assert_eq!(set.get("missing"), None);
        assert_eq!(set.iter().map(|(k, _)| k).collect::<Vec<_>>(), vec!["id", "rack"]);
    }
}
