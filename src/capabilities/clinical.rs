//! Rule-based clinical and analytics scorers
//!
//! These are heuristic stand-ins for trained models. They are plugged into
//! the registry like any other handler and hold no state.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::capability::{AsyncCapability, Terms};
use crate::errors::{CapabilityError, CapabilityResult};

pub const SEPSIS_RISK: &str = "clinical:sepsis_risk";
pub const DRUG_INTERACTION: &str = "clinical:drug_interaction";
pub const READMISSION_RISK: &str = "analytics:readmission_risk";

const SEPSIS_CONFIDENCE: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    fn from_score(score: f64) -> Self {
        if score > 0.6 {
            RiskLevel::High
        } else if score > 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Numeric field of `object`, or `default` when absent.
fn number_or(object: &Map<String, Value>, field: &str, default: f64) -> CapabilityResult<f64> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| CapabilityError::validation(field, format!("'{field}' must be a number"))),
    }
}

pub struct SepsisRiskCapability;

#[async_trait]
impl AsyncCapability for SepsisRiskCapability {
    async fn execute(&self, terms: Terms) -> CapabilityResult<Value> {
        let vitals = match terms.get("vitals") {
            Some(Value::Object(map)) if !map.is_empty() => map,
            _ => {
                return Err(CapabilityError::validation(
                    "vitals",
                    "missing 'vitals' in terms",
                ))
            }
        };

        let temperature = number_or(vitals, "temperature", 98.6)?;
        let heart_rate = number_or(vitals, "heart_rate", 80.0)?;
        let bp_systolic = number_or(vitals, "bp_systolic", 120.0)?;
        let wbc_count = number_or(vitals, "wbc_count", 7.5)?;

        let mut score = 0.0;
        if !(96.8..=100.4).contains(&temperature) {
            score += 0.3;
        }
        if heart_rate > 90.0 {
            score += 0.2;
        }
        if bp_systolic < 100.0 {
            score += 0.3;
        }
        if !(4.0..=12.0).contains(&wbc_count) {
            score += 0.2;
        }

        let level = RiskLevel::from_score(score);
        let recommendation = match level {
            RiskLevel::High => "INITIATE SEPSIS PROTOCOL - Alert physician immediately",
            RiskLevel::Medium => "Increase monitoring frequency, consider blood cultures",
            RiskLevel::Low => "Continue monitoring",
        };

        Ok(json!({
            "risk_score": score,
            "risk_level": level,
            "recommendation": recommendation,
            "confidence": SEPSIS_CONFIDENCE,
        }))
    }
}

/// Known dangerous pairs and the warning they carry
const DANGEROUS_PAIRS: [(&str, &str, &str); 3] = [
    ("warfarin", "aspirin", "Increased bleeding risk"),
    ("metformin", "iodinated_contrast", "Lactic acidosis risk"),
    ("ssri", "tramadol", "Serotonin syndrome risk"),
];

pub struct DrugInteractionCapability;

#[async_trait]
impl AsyncCapability for DrugInteractionCapability {
    async fn execute(&self, terms: Terms) -> CapabilityResult<Value> {
        let medications = match terms.get("medications") {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => {
                return Err(CapabilityError::validation(
                    "medications",
                    "missing 'medications' in terms",
                ))
            }
        };

        let names = medications
            .iter()
            .map(|m| {
                m.as_str().map(str::to_lowercase).ok_or_else(|| {
                    CapabilityError::validation("medications", "medication names must be strings")
                })
            })
            .collect::<CapabilityResult<Vec<String>>>()?;
        // Substring match over the joined list, so "warfarin sodium" still counts.
        let joined = names.join(" ");

        let interactions: Vec<Value> = DANGEROUS_PAIRS
            .iter()
            .filter(|(a, b, _)| joined.contains(a) && joined.contains(b))
            .map(|(a, b, warning)| {
                json!({
                    "drugs": [a, b],
                    "severity": "HIGH",
                    "warning": warning,
                })
            })
            .collect();

        Ok(json!({
            "has_interactions": !interactions.is_empty(),
            "interactions": interactions,
            "checked_medications": medications,
        }))
    }
}

pub struct ReadmissionRiskCapability;

#[async_trait]
impl AsyncCapability for ReadmissionRiskCapability {
    async fn execute(&self, terms: Terms) -> CapabilityResult<Value> {
        let empty = Map::new();
        let patient = match terms.get("patient_data") {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(CapabilityError::validation(
                    "patient_data",
                    "'patient_data' must be an object",
                ))
            }
        };

        let mut score: f64 = 0.0;
        let mut factors = Vec::new();
        if number_or(patient, "age", 0.0)? > 65.0 {
            score += 0.3;
            factors.push("Age > 65");
        }
        if number_or(patient, "chronic_conditions", 0.0)? > 2.0 {
            score += 0.4;
            factors.push("Multiple chronic conditions");
        }
        if number_or(patient, "previous_admissions_30d", 0.0)? > 0.0 {
            score += 0.3;
            factors.push("Recent admission");
        }

        let recommendation = if score > 0.6 {
            "Consider discharge planning intervention"
        } else {
            "Standard discharge protocol"
        };

        Ok(json!({
            "risk_score": score.min(1.0),
            "risk_level": RiskLevel::from_score(score),
            "risk_factors": factors,
            "recommendation": recommendation,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn terms(value: Value) -> Terms {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn sepsis_levels() {
        let normal = SepsisRiskCapability
            .execute(terms(json!({ "vitals": { "temperature": 98.6 } })))
            .await
            .unwrap();
        assert_eq!(normal["risk_level"], "LOW");
        assert_eq!(normal["recommendation"], "Continue monitoring");
        assert_eq!(normal["confidence"], 0.85);

        let elevated = SepsisRiskCapability
            .execute(terms(json!({ "vitals": { "heart_rate": 110, "wbc_count": 14.0 } })))
            .await
            .unwrap();
        assert_eq!(elevated["risk_level"], "MEDIUM");

        let septic = SepsisRiskCapability
            .execute(terms(json!({
                "vitals": { "temperature": 102.1, "heart_rate": 120, "bp_systolic": 85 }
            })))
            .await
            .unwrap();
        assert_eq!(septic["risk_level"], "HIGH");
        assert!(septic["recommendation"]
            .as_str()
            .unwrap()
            .starts_with("INITIATE SEPSIS PROTOCOL"));
    }

    #[tokio::test]
    async fn sepsis_requires_vitals() {
        for t in [json!({}), json!({ "vitals": {} }), json!({ "vitals": "high" })] {
            let err = SepsisRiskCapability.execute(terms(t)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationError);
        }
        let err = SepsisRiskCapability
            .execute(terms(json!({ "vitals": { "heart_rate": "fast" } })))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn drug_pairs_are_flagged() {
        let out = DrugInteractionCapability
            .execute(terms(json!({ "medications": ["Warfarin", "Aspirin 81mg", "Lisinopril"] })))
            .await
            .unwrap();
        assert_eq!(out["has_interactions"], true);
        assert_eq!(out["interactions"].as_array().unwrap().len(), 1);
        assert_eq!(out["interactions"][0]["warning"], "Increased bleeding risk");
        assert_eq!(out["checked_medications"][1], "Aspirin 81mg");

        let clean = DrugInteractionCapability
            .execute(terms(json!({ "medications": ["metformin"] })))
            .await
            .unwrap();
        assert_eq!(clean["has_interactions"], false);
    }

    #[tokio::test]
    async fn drug_check_requires_medications() {
        for t in [json!({}), json!({ "medications": [] }), json!({ "medications": [1, 2] })] {
            let err = DrugInteractionCapability.execute(terms(t)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationError);
        }
    }

    #[tokio::test]
    async fn readmission_score_is_capped() {
        let out = ReadmissionRiskCapability
            .execute(terms(json!({
                "patient_data": { "age": 80, "chronic_conditions": 4, "previous_admissions_30d": 2 }
            })))
            .await
            .unwrap();
        assert!(out["risk_score"].as_f64().unwrap() <= 1.0);
        assert!((out["risk_score"].as_f64().unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(out["risk_level"], "HIGH");
        assert_eq!(out["risk_factors"].as_array().unwrap().len(), 3);
        assert_eq!(out["recommendation"], "Consider discharge planning intervention");

        let young = ReadmissionRiskCapability.execute(Terms::new()).await.unwrap();
        assert_eq!(young["risk_level"], "LOW");
        assert_eq!(young["recommendation"], "Standard discharge protocol");
    }
}
