//! Append-only statistical accumulator
//!
//! A [`Metric`] owns its raw values and attribution metadata behind one lock.
//! Every statistic is recomputed from the raw values on each read; nothing is
//! cached between reads. Statistics over too few values return `NaN` instead of
//! failing.
//!
//! Reading a scalar statistic while an assertion context is active attaches a
//! [`MetricReading`] to that assertion's evidence.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::context::{current_assertion_context, current_test_context};
use crate::evidence::MetricReading;
use crate::scope::Scope;

// ============================================================================
// Values
// ============================================================================

/// A single recorded data point
///
/// Serialized as a bare JSON bool or number. Non-finite floats are written as
/// the strings `"NaN"`, `"inf"` and `"-inf"` so they survive a reload.
#[derive(Debug, Clone, Copy)]
pub enum MetricValue {
    /// Boolean outcome, counted as 0.0 / 1.0 in numeric statistics
    Bool(bool),
    /// Integer measurement
    Int(i64),
    /// Floating point measurement
    Float(f64),
}

impl MetricValue {
    /// Numeric view used by the statistics
    pub fn as_f64(&self) -> f64 {
        match *self {
            MetricValue::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            MetricValue::Int(i) => i as f64,
            MetricValue::Float(f) => f,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            MetricValue::Bool(_) => 0,
            MetricValue::Int(_) => 1,
            MetricValue::Float(_) => 2,
        }
    }
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            MetricValue::Bool(b) => serializer.serialize_bool(b),
            MetricValue::Int(i) => serializer.serialize_i64(i),
            MetricValue::Float(f) => non_finite::serialize(&f, serializer),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MetricValueRepr {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl<'de> Deserialize<'de> for MetricValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match MetricValueRepr::deserialize(deserializer)? {
            MetricValueRepr::Bool(b) => MetricValue::Bool(b),
            MetricValueRepr::Int(i) => MetricValue::Int(i),
            MetricValueRepr::Float(f) => MetricValue::Float(f),
            MetricValueRepr::Text(text) => {
                MetricValue::Float(non_finite::parse(&text).map_err(D::Error::custom)?)
            }
            MetricValueRepr::Null => MetricValue::Float(f64::NAN),
        })
    }
}

impl PartialEq for MetricValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MetricValue {}

impl PartialOrd for MetricValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetricValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (MetricValue::Bool(a), MetricValue::Bool(b)) => a.cmp(b),
            (MetricValue::Int(a), MetricValue::Int(b)) => a.cmp(b),
            (MetricValue::Float(a), MetricValue::Float(b)) => a.total_cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for MetricValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            MetricValue::Bool(b) => b.hash(state),
            MetricValue::Int(i) => i.hash(state),
            MetricValue::Float(f) => f.to_bits().hash(state),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Bool(b) => write!(f, "{b}"),
            MetricValue::Int(i) => write!(f, "{i}"),
            MetricValue::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        MetricValue::Bool(value)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Int(value)
    }
}

impl From<i32> for MetricValue {
    fn from(value: i32) -> Self {
        MetricValue::Int(i64::from(value))
    }
}

impl From<u32> for MetricValue {
    fn from(value: u32) -> Self {
        MetricValue::Int(i64::from(value))
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

impl From<f32> for MetricValue {
    fn from(value: f32) -> Self {
        MetricValue::Float(f64::from(value))
    }
}

/// Confidence levels supported by [`Metric::confidence_interval`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    /// 90% (z = 1.645)
    P90,
    /// 95% (z = 1.96)
    P95,
    /// 99% (z = 2.576)
    P99,
}

impl ConfidenceLevel {
    /// Normal-approximation critical value
    pub fn z(&self) -> f64 {
        match self {
            ConfidenceLevel::P90 => 1.645,
            ConfidenceLevel::P95 => 1.96,
            ConfidenceLevel::P99 => 2.576,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ConfidenceLevel::P90 => "ci_90",
            ConfidenceLevel::P95 => "ci_95",
            ConfidenceLevel::P99 => "ci_99",
        }
    }
}

/// Frequency of each distinct recorded value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Counter(BTreeMap<MetricValue, usize>);

impl Counter {
    /// Occurrences of `value`, zero when never recorded
    pub fn get(&self, value: impl Into<MetricValue>) -> usize {
        self.0.get(&value.into()).copied().unwrap_or(0)
    }

    /// Number of distinct values
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(value, count)` pairs in value order
    pub fn iter(&self) -> impl Iterator<Item = (&MetricValue, &usize)> {
        self.0.iter()
    }

    /// Total number of recorded values
    pub fn total(&self) -> usize {
        self.0.values().sum()
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Lifecycle and attribution metadata of a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMetadata {
    /// Timestamp of the first recorded value, never overwritten
    pub first_recorded_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recently recorded value
    pub last_recorded_at: Option<DateTime<Utc>>,
    /// Lifecycle scope the metric was resolved under
    pub scope: Scope,
    /// Names of tests that recorded values
    pub collected_from_tests: BTreeSet<String>,
    /// Names of consumers the metric was injected into
    pub collected_from_resources: BTreeSet<String>,
    /// Case identities that recorded values
    pub collected_from_cases: BTreeSet<String>,
}

impl Default for MetricMetadata {
    fn default() -> Self {
        Self {
            first_recorded_at: None,
            last_recorded_at: None,
            scope: Scope::Session,
            collected_from_tests: BTreeSet::new(),
            collected_from_resources: BTreeSet::new(),
            collected_from_cases: BTreeSet::new(),
        }
    }
}

// ============================================================================
// Metric
// ============================================================================

#[derive(Debug, Default)]
struct MetricState {
    values: Vec<MetricValue>,
    metadata: MetricMetadata,
    final_value: Option<MetricValue>,
}

/// Thread-safe accumulator of data points with derived statistics
#[derive(Debug)]
pub struct Metric {
    name: String,
    state: Mutex<MetricState>,
}

impl Metric {
    /// Create an empty metric
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MetricState::default()),
        }
    }

    /// Create an empty metric tagged with `scope`
    pub fn with_scope(name: impl Into<String>, scope: Scope) -> Self {
        let metric = Self::new(name);
        metric.set_scope(scope);
        metric
    }

    /// Metric name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record one value
    pub fn add_record(&self, value: impl Into<MetricValue>) {
        self.append(vec![value.into()]);
    }

    /// Record a sequence of values in one atomic step
    pub fn add_records<I, V>(&self, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<MetricValue>,
    {
        self.append(values.into_iter().map(Into::into).collect());
    }

    fn append(&self, values: Vec<MetricValue>) {
        let test_ctx = current_test_context();
        let now = Utc::now();
        let mut state = self.state.lock();
        if let Some(ctx) = &test_ctx {
            state
                .metadata
                .collected_from_tests
                .insert(ctx.test_name().to_string());
            state
                .metadata
                .collected_from_cases
                .insert(ctx.case_id().to_string());
        }
        if state.metadata.first_recorded_at.is_none() {
            state.metadata.first_recorded_at = Some(now);
        }
        state.metadata.last_recorded_at = Some(now);
        state.values.extend(values);
    }

    /// Tag the metric with the scope it was resolved under
    pub fn set_scope(&self, scope: Scope) {
        self.state.lock().metadata.scope = scope;
    }

    /// Record that `consumer` received this metric through the resolver
    pub fn add_resource_consumer(&self, consumer: impl Into<String>) {
        self.state
            .lock()
            .metadata
            .collected_from_resources
            .insert(consumer.into());
    }

    /// Snapshot of the metadata
    pub fn metadata(&self) -> MetricMetadata {
        self.state.lock().metadata.clone()
    }

    /// Copy of the raw values in record order
    pub fn raw_values(&self) -> Vec<MetricValue> {
        self.state.lock().values.clone()
    }

    /// Number of recorded values
    pub fn len(&self) -> usize {
        self.state.lock().values.len()
    }

    /// Whether no value was recorded yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Explicit final value of the metric, if one was set
    pub fn final_value(&self) -> Option<MetricValue> {
        self.state.lock().final_value
    }

    /// Set the explicit final value
    pub fn set_final_value(&self, value: impl Into<MetricValue>) {
        self.state.lock().final_value = Some(value.into());
    }

    fn floats(&self) -> Vec<f64> {
        self.state.lock().values.iter().map(MetricValue::as_f64).collect()
    }

    fn observe(&self, statistic: &str, value: f64) -> f64 {
        if let Some(assertion) = current_assertion_context() {
            assertion.push_metric_reading(MetricReading {
                metric_name: self.name.clone(),
                statistic: statistic.to_string(),
                value,
                case_id: current_test_context().map(|ctx| ctx.case_id().to_string()),
            });
        }
        value
    }

    /// Sum of values, zero when empty
    pub fn sum(&self) -> f64 {
        self.observe("sum", stats::sum(&self.floats()))
    }

    /// Smallest value
    pub fn min(&self) -> f64 {
        self.observe("min", stats::min(&self.floats()))
    }

    /// Largest value
    pub fn max(&self) -> f64 {
        self.observe("max", stats::max(&self.floats()))
    }

    /// Arithmetic mean
    pub fn mean(&self) -> f64 {
        self.observe("mean", stats::mean(&self.floats()))
    }

    /// Median
    pub fn median(&self) -> f64 {
        self.observe("median", stats::median(&self.floats()))
    }

    /// Sample variance, `NaN` below two values
    pub fn variance(&self) -> f64 {
        self.observe("variance", stats::variance(&self.floats()))
    }

    /// Population variance, `NaN` when empty
    pub fn population_variance(&self) -> f64 {
        self.observe(
            "population_variance",
            stats::population_variance(&self.floats()),
        )
    }

    /// Sample standard deviation
    pub fn std(&self) -> f64 {
        self.observe("std", stats::variance(&self.floats()).sqrt())
    }

    /// Population standard deviation
    pub fn population_std(&self) -> f64 {
        self.observe(
            "population_std",
            stats::population_variance(&self.floats()).sqrt(),
        )
    }

    /// Percentile `p` in `(0, 100)` using linear interpolation between closest ranks
    pub fn percentile(&self, p: f64) -> f64 {
        let value = stats::percentile(&self.floats(), p);
        self.observe(&format!("p{p}"), value)
    }

    /// 25th percentile
    pub fn p25(&self) -> f64 {
        self.percentile(25.0)
    }

    /// 50th percentile (median)
    pub fn p50(&self) -> f64 {
        self.percentile(50.0)
    }

    /// 75th percentile
    pub fn p75(&self) -> f64 {
        self.percentile(75.0)
    }

    /// 90th percentile
    pub fn p90(&self) -> f64 {
        self.percentile(90.0)
    }

    /// 95th percentile
    pub fn p95(&self) -> f64 {
        self.percentile(95.0)
    }

    /// 99th percentile
    pub fn p99(&self) -> f64 {
        self.percentile(99.0)
    }

    /// Normal-approximation confidence interval `mean ± z·std/√n`
    ///
    /// Both bounds are `NaN` when fewer than two values were recorded.
    pub fn confidence_interval(&self, level: ConfidenceLevel) -> (f64, f64) {
        let (lower, upper) = stats::confidence_interval(&self.floats(), level.z());
        let label = level.label();
        (
            self.observe(&format!("{label}_lower"), lower),
            self.observe(&format!("{label}_upper"), upper),
        )
    }

    /// 90% confidence interval
    pub fn ci_90(&self) -> (f64, f64) {
        self.confidence_interval(ConfidenceLevel::P90)
    }

    /// 95% confidence interval
    pub fn ci_95(&self) -> (f64, f64) {
        self.confidence_interval(ConfidenceLevel::P95)
    }

    /// 99% confidence interval
    pub fn ci_99(&self) -> (f64, f64) {
        self.confidence_interval(ConfidenceLevel::P99)
    }

    fn counts(&self) -> Counter {
        let state = self.state.lock();
        let mut counts = BTreeMap::new();
        for value in &state.values {
            *counts.entry(*value).or_insert(0) += 1;
        }
        Counter(counts)
    }

    /// Count of each distinct value
    ///
    /// Inside an assertion, each key is recorded as a `counter[<value>]` reading.
    pub fn counter(&self) -> Counter {
        let counter = self.counts();
        for (value, count) in counter.iter() {
            self.observe(&format!("counter[{value}]"), *count as f64);
        }
        counter
    }

    /// Share of each distinct value; sums to 1.0 over recorded keys
    ///
    /// Inside an assertion, each key is recorded as a `distribution[<value>]`
    /// reading.
    pub fn distribution(&self) -> BTreeMap<MetricValue, f64> {
        let counter = self.counts();
        let total = counter.total();
        if total == 0 {
            return BTreeMap::new();
        }
        counter
            .iter()
            .map(|(value, count)| {
                let share = *count as f64 / total as f64;
                (*value, self.observe(&format!("distribution[{value}]"), share))
            })
            .collect()
    }

    /// Serializable summary for reporting and storage
    ///
    /// Building a snapshot does not attach readings to an active assertion.
    pub fn snapshot(&self) -> MetricSnapshot {
        let (values, metadata, final_value) = {
            let state = self.state.lock();
            (
                state.values.clone(),
                state.metadata.clone(),
                state.final_value,
            )
        };
        let floats: Vec<f64> = values.iter().map(MetricValue::as_f64).collect();
        MetricSnapshot {
            name: self.name.clone(),
            len: floats.len(),
            sum: stats::sum(&floats),
            mean: stats::mean(&floats),
            min: stats::min(&floats),
            max: stats::max(&floats),
            std: stats::variance(&floats).sqrt(),
            p50: stats::median(&floats),
            p95: stats::percentile(&floats, 95.0),
            values,
            final_value,
            metadata,
        }
    }
}

/// Point-in-time summary of a metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Metric name
    pub name: String,
    /// Number of values
    pub len: usize,
    /// Sum of values
    #[serde(with = "nan_as_null")]
    pub sum: f64,
    /// Mean
    #[serde(with = "nan_as_null")]
    pub mean: f64,
    /// Minimum
    #[serde(with = "nan_as_null")]
    pub min: f64,
    /// Maximum
    #[serde(with = "nan_as_null")]
    pub max: f64,
    /// Sample standard deviation
    #[serde(with = "nan_as_null")]
    pub std: f64,
    /// Median
    #[serde(with = "nan_as_null")]
    pub p50: f64,
    /// 95th percentile
    #[serde(with = "nan_as_null")]
    pub p95: f64,
    /// Raw values in record order
    pub values: Vec<MetricValue>,
    /// Explicit final value
    pub final_value: Option<MetricValue>,
    /// Attribution metadata
    pub metadata: MetricMetadata,
}

/// Serde adapter storing `NaN` as `null`, since JSON has no NaN literal
pub mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize `NaN` as `null`
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_some(value)
        }
    }

    /// Deserialize `null` as `NaN`
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Serde adapter for floats that may be non-finite
///
/// Finite values are plain JSON numbers; `NaN` and the infinities are written
/// as `"NaN"`, `"inf"` and `"-inf"`. `null` reads back as `NaN`.
pub mod non_finite {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    /// Serialize a float, labelling non-finite values
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_sign_positive() {
            serializer.serialize_str("inf")
        } else {
            serializer.serialize_str("-inf")
        }
    }

    /// Deserialize a number, a non-finite label or `null`
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Option::<Repr>::deserialize(deserializer)? {
            Some(Repr::Number(value)) => Ok(value),
            Some(Repr::Text(text)) => parse(&text).map_err(D::Error::custom),
            None => Ok(f64::NAN),
        }
    }

    pub(crate) fn parse(text: &str) -> Result<f64, String> {
        match text {
            "NaN" => Ok(f64::NAN),
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            other => Err(format!("expected a number or non-finite label, got {other:?}")),
        }
    }
}

mod stats {
    pub(super) fn sum(xs: &[f64]) -> f64 {
        // Neumaier compensated summation
        let mut total = 0.0_f64;
        let mut compensation = 0.0_f64;
        for &x in xs {
            let t = total + x;
            if total.abs() >= x.abs() {
                compensation += (total - t) + x;
            } else {
                compensation += (x - t) + total;
            }
            total = t;
        }
        total + compensation
    }

    pub(super) fn mean(xs: &[f64]) -> f64 {
        if xs.is_empty() {
            return f64::NAN;
        }
        sum(xs) / xs.len() as f64
    }

    pub(super) fn min(xs: &[f64]) -> f64 {
        xs.iter().copied().reduce(f64::min).unwrap_or(f64::NAN)
    }

    pub(super) fn max(xs: &[f64]) -> f64 {
        xs.iter().copied().reduce(f64::max).unwrap_or(f64::NAN)
    }

    fn sorted(xs: &[f64]) -> Vec<f64> {
        let mut v = xs.to_vec();
        v.sort_by(|a, b| a.total_cmp(b));
        v
    }

    pub(super) fn median(xs: &[f64]) -> f64 {
        if xs.is_empty() {
            return f64::NAN;
        }
        let v = sorted(xs);
        let mid = v.len() / 2;
        if v.len() % 2 == 1 {
            v[mid]
        } else {
            (v[mid - 1] + v[mid]) / 2.0
        }
    }

    fn squared_deviations(xs: &[f64]) -> f64 {
        let m = mean(xs);
        xs.iter().map(|x| (x - m) * (x - m)).sum()
    }

    pub(super) fn variance(xs: &[f64]) -> f64 {
        if xs.len() < 2 {
            return f64::NAN;
        }
        squared_deviations(xs) / (xs.len() - 1) as f64
    }

    pub(super) fn population_variance(xs: &[f64]) -> f64 {
        if xs.is_empty() {
            return f64::NAN;
        }
        squared_deviations(xs) / xs.len() as f64
    }

    pub(super) fn percentile(xs: &[f64], p: f64) -> f64 {
        if xs.is_empty() || !(p > 0.0 && p < 100.0) {
            return f64::NAN;
        }
        let v = sorted(xs);
        let position = (v.len() - 1) as f64 * p / 100.0;
        let lower = position.floor() as usize;
        let fraction = position - lower as f64;
        match v.get(lower + 1) {
            Some(next) => v[lower] + (next - v[lower]) * fraction,
            None => v[lower],
        }
    }

    pub(super) fn confidence_interval(xs: &[f64], z: f64) -> (f64, f64) {
        if xs.len() < 2 {
            return (f64::NAN, f64::NAN);
        }
        let m = mean(xs);
        let half = z * variance(xs).sqrt() / (xs.len() as f64).sqrt();
        (m - half, m + half)
    }
}
