//! Absolute and percentage impact between a reference and a treatment
//! condition.
//!
//! Every delta in this crate is `treatment - reference`, and percentages are
//! relative to the reference value.

use std::{fmt, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::MetricSet;

/// The difference between a treatment value and its reference value
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ImpactResult {
    pub absolute_delta: f64,
    /// Infinite only under [`ZeroReferencePolicy::Unbounded`]; written as
    /// `"inf"` / `"-inf"` since JSON has no infinity
    #[serde(with = "percentage")]
    pub percentage_delta: f64,
}

/// The result of a 2x2 design: reference/treatment crossed with a second
/// dimension being off (`a`) or on (`b`)
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct CrossImpact {
    pub a: ImpactResult,
    pub b: ImpactResult,
    /// How much larger the treatment effect is under `b` than under `a`
    pub impact_amplification: f64,
}

/// Which side of a comparison a value came from
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Reference,
    Treatment,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Reference => write!(f, "reference"),
            Side::Treatment => write!(f, "treatment"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeltaError {
    #[error("Reference value is zero, percentage delta against treatment {treatment} is undefined")]
    DivisionByZero { treatment: f64 },
    #[error("Metric `{metric}` is missing from the {side} set")]
    MissingMetric { metric: String, side: Side },
    #[error("The {side} value {value} is not a finite number")]
    NonFinite { side: Side, value: f64 },
    #[error("Comparing {reference} to {treatment} overflows")]
    Overflow { reference: f64, treatment: f64 },
}

/// What to do when a percentage delta is requested against a zero reference
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ZeroReferencePolicy {
    /// Fail with [`DeltaError::DivisionByZero`]
    Error,
    /// Drop the comparison from the results
    Skip,
    /// Report the percentage as signed infinity
    Unbounded,
}

impl Default for ZeroReferencePolicy {
    fn default() -> Self {
        ZeroReferencePolicy::Error
    }
}

impl FromStr for ZeroReferencePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(ZeroReferencePolicy::Error),
            "skip" => Ok(ZeroReferencePolicy::Skip),
            "unbounded" => Ok(ZeroReferencePolicy::Unbounded),
            other => Err(format!(
                "unknown zero reference policy `{}`, expected one of: error, skip, unbounded",
                other
            )),
        }
    }
}

/// Compute the impact of `treatment_value` relative to `reference_value`
pub fn compute_delta(
    reference_value: f64,
    treatment_value: f64,
) -> Result<ImpactResult, DeltaError> {
    check_finite(reference_value, Side::Reference)?;
    check_finite(treatment_value, Side::Treatment)?;

    if reference_value == 0. {
        return Err(DeltaError::DivisionByZero {
            treatment: treatment_value,
        });
    }

    let absolute_delta = treatment_value - reference_value;
    let percentage_delta = absolute_delta / reference_value * 100.;
    if !absolute_delta.is_finite() || !percentage_delta.is_finite() {
        return Err(DeltaError::Overflow {
            reference: reference_value,
            treatment: treatment_value,
        });
    }

    Ok(ImpactResult {
        absolute_delta,
        percentage_delta,
    })
}

/// Compute the deltas of a 2x2 design and how much the second dimension
/// amplifies the treatment effect
pub fn compute_cross_impact(
    ref_a: f64,
    treat_a: f64,
    ref_b: f64,
    treat_b: f64,
) -> Result<CrossImpact, DeltaError> {
    let a = compute_delta(ref_a, treat_a)?;
    let b = compute_delta(ref_b, treat_b)?;
    cross(a, b)
}

/// Compute the delta of every named metric, in the order given
///
/// Fails on the first name that is missing from either set.
pub fn aggregate_over_metrics<S: AsRef<str>>(
    metric_names: &[S],
    reference_set: &MetricSet,
    treatment_set: &MetricSet,
) -> Result<IndexMap<String, ImpactResult>, DeltaError> {
    metric_names
        .iter()
        .map(|name| {
            let name = name.as_ref();
            let (reference, treatment) = lookup_pair(name, reference_set, treatment_set)?;
            Ok((name.to_string(), compute_delta(reference, treatment)?))
        })
        .collect()
}

/// Delta computations with an explicit [`ZeroReferencePolicy`]
///
/// Operations return `Ok(None)` only under [`ZeroReferencePolicy::Skip`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DeltaAnalyzer {
    zero_reference: ZeroReferencePolicy,
}

impl DeltaAnalyzer {
    pub fn new(zero_reference: ZeroReferencePolicy) -> Self {
        DeltaAnalyzer { zero_reference }
    }

    pub fn zero_reference(&self) -> ZeroReferencePolicy {
        self.zero_reference
    }

    pub fn delta(
        &self,
        reference_value: f64,
        treatment_value: f64,
    ) -> Result<Option<ImpactResult>, DeltaError> {
        match compute_delta(reference_value, treatment_value) {
            Ok(result) => Ok(Some(result)),
            Err(DeltaError::DivisionByZero { treatment }) => match self.zero_reference {
                ZeroReferencePolicy::Error => Err(DeltaError::DivisionByZero { treatment }),
                ZeroReferencePolicy::Skip => Ok(None),
                ZeroReferencePolicy::Unbounded => {
                    let absolute_delta = treatment - reference_value;
                    let percentage_delta = if absolute_delta == 0. {
                        0.
                    } else {
                        f64::INFINITY.copysign(absolute_delta)
                    };
                    Ok(Some(ImpactResult {
                        absolute_delta,
                        percentage_delta,
                    }))
                }
            },
            Err(e) => Err(e),
        }
    }

    pub fn cross_impact(
        &self,
        ref_a: f64,
        treat_a: f64,
        ref_b: f64,
        treat_b: f64,
    ) -> Result<Option<CrossImpact>, DeltaError> {
        let a = self.delta(ref_a, treat_a)?;
        let b = self.delta(ref_b, treat_b)?;
        match (a, b) {
            (Some(a), Some(b)) => cross(a, b).map(Some),
            _ => Ok(None),
        }
    }

    /// Like [`aggregate_over_metrics`], skipped metrics are left out
    pub fn aggregate<S: AsRef<str>>(
        &self,
        metric_names: &[S],
        reference_set: &MetricSet,
        treatment_set: &MetricSet,
    ) -> Result<IndexMap<String, ImpactResult>, DeltaError> {
        let mut results = IndexMap::with_capacity(metric_names.len());
        for name in metric_names {
            let name = name.as_ref();
            let (reference, treatment) = lookup_pair(name, reference_set, treatment_set)?;
            if let Some(result) = self.delta(reference, treatment)? {
                results.insert(name.to_string(), result);
            }
        }
        Ok(results)
    }

    /// The cross impact of every named metric over a 2x2 design of metric sets
    pub fn cross_over_metrics<S: AsRef<str>>(
        &self,
        metric_names: &[S],
        reference_a: &MetricSet,
        treatment_a: &MetricSet,
        reference_b: &MetricSet,
        treatment_b: &MetricSet,
    ) -> Result<IndexMap<String, CrossImpact>, DeltaError> {
        let mut results = IndexMap::with_capacity(metric_names.len());
        for name in metric_names {
            let name = name.as_ref();
            let (ref_a, treat_a) = lookup_pair(name, reference_a, treatment_a)?;
            let (ref_b, treat_b) = lookup_pair(name, reference_b, treatment_b)?;
            if let Some(result) = self.cross_impact(ref_a, treat_a, ref_b, treat_b)? {
                results.insert(name.to_string(), result);
            }
        }
        Ok(results)
    }
}

fn cross(a: ImpactResult, b: ImpactResult) -> Result<CrossImpact, DeltaError> {
    let impact_amplification = b.absolute_delta - a.absolute_delta;
    if !impact_amplification.is_finite() {
        return Err(DeltaError::Overflow {
            reference: a.absolute_delta,
            treatment: b.absolute_delta,
        });
    }

    Ok(CrossImpact {
        a,
        b,
        impact_amplification,
    })
}

/// Serde for percentages that may be infinite
mod percentage {
    use serde::{de, Deserialize, Deserializer, Serializer};

    static INF: &str = "inf";
    static NEG_INF: &str = "-inf";

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_infinite() {
            serializer.serialize_str(if *value > 0. { INF } else { NEG_INF })
        } else {
            serializer.serialize_f64(*value)
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(x) => Ok(x),
            Repr::Text(text) if text == INF => Ok(f64::INFINITY),
            Repr::Text(text) if text == NEG_INF => Ok(f64::NEG_INFINITY),
            Repr::Text(text) => Err(de::Error::invalid_value(
                de::Unexpected::Str(&text),
                &"a number, \"inf\" or \"-inf\"",
            )),
        }
    }
}

fn check_finite(value: f64, side: Side) -> Result<(), DeltaError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(DeltaError::NonFinite { side, value })
    }
}

fn lookup_pair(
    name: &str,
    reference_set: &MetricSet,
    treatment_set: &MetricSet,
) -> Result<(f64, f64), DeltaError> {
    let missing = |side| DeltaError::MissingMetric {
        metric: name.to_string(),
        side,
    };
    let reference = reference_set
        .get(name)
        .ok_or_else(|| missing(Side::Reference))?;
    let treatment = treatment_set
        .get(name)
        .ok_or_else(|| missing(Side::Treatment))?;
    Ok((reference, treatment))
}
