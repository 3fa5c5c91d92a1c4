use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::common::MAX_RULE_DEPTH;

/// A node in the flag rule grammar. AND/OR nest full rule bodies, so the
/// type is self-referential; nesting depth is bounded at write time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuleSpec {
    #[serde(rename = "ALLOWLIST")]
    Allowlist {
        #[serde(rename = "userIds")]
        user_ids: Vec<String>,
    },
    #[serde(rename = "PERCENT_ROLLOUT")]
    PercentRollout { percentage: i64 },
    #[serde(rename = "AND")]
    And { rules: Vec<RuleSpec> },
    #[serde(rename = "OR")]
    Or { rules: Vec<RuleSpec> },
}

impl RuleSpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleSpec::Allowlist { .. } => "ALLOWLIST",
            RuleSpec::PercentRollout { .. } => "PERCENT_ROLLOUT",
            RuleSpec::And { .. } => "AND",
            RuleSpec::Or { .. } => "OR",
        }
    }

    /// Parse a stored rule row. The `condition` column holds the payload
    /// without the tag; the tag lives in the `rule_type` column.
    pub fn from_row(rule_type: &str, condition: &str) -> Result<RuleSpec, String> {
        let payload: serde_json::Value =
            serde_json::from_str(condition).map_err(|e| format!("invalid condition: {}", e))?;
        let mut object = match payload {
            serde_json::Value::Object(map) => map,
            _ => return Err("condition must be a JSON object".to_string()),
        };
        object.insert(
            "type".to_string(),
            serde_json::Value::String(rule_type.to_string()),
        );
        serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| format!("invalid rule: {}", e))
    }

    /// The payload as stored in the `condition` column (tag stripped).
    pub fn condition_json(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(object) = value.as_object_mut() {
            object.remove("type");
        }
        value.to_string()
    }

    /// Write-time validation: percentage in [0, 100], AND/OR non-empty,
    /// nesting depth bounded.
    pub fn validate(&self) -> Result<(), String> {
        self.validate_at(1)
    }

    fn validate_at(&self, depth: u32) -> Result<(), String> {
        if depth > MAX_RULE_DEPTH {
            return Err(format!("rule nesting exceeds depth {}", MAX_RULE_DEPTH));
        }
        match self {
            RuleSpec::Allowlist { .. } => Ok(()),
            RuleSpec::PercentRollout { percentage } => {
                if (0..=100).contains(percentage) {
                    Ok(())
                } else {
                    Err(format!(
                        "percentage must be between 0 and 100, got {}",
                        percentage
                    ))
                }
            }
            RuleSpec::And { rules } | RuleSpec::Or { rules } => {
                if rules.is_empty() {
                    return Err(format!("{} must have at least one child", self.type_name()));
                }
                for rule in rules {
                    rule.validate_at(depth + 1)?;
                }
                Ok(())
            }
        }
    }

    /// Whether this rule matches the context. Appends a human-readable line
    /// per node visited; AND/OR record which branch short-circuited.
    pub fn matches(&self, ctx: &EvalContext, flag_key: &str, trace: &mut Vec<String>) -> bool {
        match self {
            RuleSpec::Allowlist { user_ids } => {
                let hit = user_ids.iter().any(|u| u == &ctx.user_id);
                trace.push(format!(
                    "ALLOWLIST: user '{}' {} allowlist -> {}",
                    ctx.user_id,
                    if hit { "in" } else { "not in" },
                    if hit { "match" } else { "no match" },
                ));
                hit
            }
            RuleSpec::PercentRollout { percentage } => {
                let bucket = stable_hash(&ctx.user_id, flag_key);
                let hit = i64::from(bucket) < *percentage;
                trace.push(format!(
                    "PERCENT_ROLLOUT({}): user '{}' hashed to bucket {} -> {}",
                    percentage,
                    ctx.user_id,
                    bucket,
                    if hit { "match" } else { "no match" },
                ));
                hit
            }
            RuleSpec::And { rules } => {
                for (i, rule) in rules.iter().enumerate() {
                    if !rule.matches(ctx, flag_key, trace) {
                        trace.push(format!(
                            "AND: child {} missed, short-circuit -> no match",
                            i + 1
                        ));
                        return false;
                    }
                }
                trace.push(format!("AND: all {} children matched -> match", rules.len()));
                true
            }
            RuleSpec::Or { rules } => {
                for (i, rule) in rules.iter().enumerate() {
                    if rule.matches(ctx, flag_key, trace) {
                        trace.push(format!(
                            "OR: child {} matched, short-circuit -> match",
                            i + 1
                        ));
                        return true;
                    }
                }
                trace.push(format!("OR: none of {} children matched -> no match", rules.len()));
                false
            }
        }
    }
}

/// Deterministic `(user_id, flag_key) -> [0, 100)` bucket: the first 32 bits
/// of SHA-256 over `user_id + ":" + flag_key`, big-endian, modulo 100.
pub fn stable_hash(user_id: &str, flag_key: &str) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(flag_key.as_bytes());
    let digest = hasher.finalize();
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % 100
}

/// Evaluation inputs. `service` rides along for callers that key flags by
/// deploying service; the rule grammar itself does not consume it.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalContext {
    pub user_id: String,
    pub environment: String,
    #[serde(default)]
    pub service: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub enabled: bool,
    pub reason: String,
    pub trace: Vec<String>,
}

/// The flag fields evaluation needs, detached from the storage row.
#[derive(Clone, Debug)]
pub struct FlagSnapshot {
    pub key: String,
    pub enabled: bool,
    pub environment: String,
}

/// A stored rule prepared for evaluation. `spec` is `None` when the stored
/// condition no longer parses; such rules are traced and never match.
#[derive(Clone, Debug)]
pub struct ParsedRule {
    pub raw_type: String,
    pub spec: Option<RuleSpec>,
}

/// Deterministic evaluation: disabled and environment checks first, then
/// rules in stored order with first match winning.
pub fn evaluate(flag: &FlagSnapshot, rules: &[ParsedRule], ctx: &EvalContext) -> Evaluation {
    let mut trace = Vec::new();

    if !flag.enabled {
        trace.push(format!("flag '{}' is globally disabled", flag.key));
        return Evaluation {
            enabled: false,
            reason: "globally disabled".to_string(),
            trace,
        };
    }

    if flag.environment != ctx.environment {
        trace.push(format!(
            "flag environment {} does not match context environment {}",
            flag.environment, ctx.environment
        ));
        return Evaluation {
            enabled: false,
            reason: "environment mismatch".to_string(),
            trace,
        };
    }

    if rules.is_empty() {
        trace.push("flag has no rules".to_string());
        return Evaluation {
            enabled: true,
            reason: "no rules, enabled for all".to_string(),
            trace,
        };
    }

    for (i, rule) in rules.iter().enumerate() {
        match &rule.spec {
            Some(spec) => {
                if spec.matches(ctx, &flag.key, &mut trace) {
                    return Evaluation {
                        enabled: true,
                        reason: format!("matched rule {}", i + 1),
                        trace,
                    };
                }
            }
            None => {
                trace.push(format!(
                    "rule {} {}: unparseable condition -> no match",
                    i + 1,
                    rule.raw_type
                ));
            }
        }
    }

    Evaluation {
        enabled: false,
        reason: "no rules matched".to_string(),
        trace,
    }
}

/// Flag keys are lowercase alphanumeric plus `-` and `_`.
pub fn valid_flag_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}
