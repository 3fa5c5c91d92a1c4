use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IncidentStatus {
    Open,
    Mitigated,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IncidentStatus::Open => "OPEN",
            IncidentStatus::Mitigated => "MITIGATED",
            IncidentStatus::Resolved => "RESOLVED",
        }
    }

    /// Legal next states. RESOLVED is terminal; self-transitions are not
    /// legal for any state.
    pub fn allowed_transitions(self) -> &'static [IncidentStatus] {
        match self {
            IncidentStatus::Open => &[IncidentStatus::Mitigated, IncidentStatus::Resolved],
            IncidentStatus::Mitigated => &[IncidentStatus::Resolved],
            IncidentStatus::Resolved => &[],
        }
    }

    pub fn can_transition_to(self, target: IncidentStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Whether `target` is reachable by zero or more transitions. Bulk
    /// operations validate against reachability, so an incident already at
    /// the target passes; single transitions stay strict.
    pub fn has_path_to(self, target: IncidentStatus) -> bool {
        self == target || self.can_transition_to(target)
    }
}

impl Display for IncidentStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(IncidentStatus::Open),
            "MITIGATED" => Ok(IncidentStatus::Mitigated),
            "RESOLVED" => Ok(IncidentStatus::Resolved),
            _ => Err(format!("unknown status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Sev1,
    Sev2,
    Sev3,
    Sev4,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Sev1 => "SEV1",
            Severity::Sev2 => "SEV2",
            Severity::Sev3 => "SEV3",
            Severity::Sev4 => "SEV4",
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SEV1" => Ok(Severity::Sev1),
            "SEV2" => Ok(Severity::Sev2),
            "SEV3" => Ok(Severity::Sev3),
            "SEV4" => Ok(Severity::Sev4),
            _ => Err(format!("unknown severity: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Dev => "DEV",
            Environment::Staging => "STAGING",
            Environment::Prod => "PROD",
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEV" => Ok(Environment::Dev),
            "STAGING" => Ok(Environment::Staging),
            "PROD" => Ok(Environment::Prod),
            _ => Err(format!("unknown environment: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Note,
    Action,
    StatusChange,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Note => "NOTE",
            EventType::Action => "ACTION",
            EventType::StatusChange => "STATUS_CHANGE",
        }
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOTE" => Ok(EventType::Note),
            "ACTION" => Ok(EventType::Action),
            "STATUS_CHANGE" => Ok(EventType::StatusChange),
            _ => Err(format!("unknown event type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScanStatus {
    Pending,
    Scanning,
    Clean,
    Infected,
    Failed,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Pending => "PENDING",
            ScanStatus::Scanning => "SCANNING",
            ScanStatus::Clean => "CLEAN",
            ScanStatus::Infected => "INFECTED",
            ScanStatus::Failed => "FAILED",
        }
    }
}

impl Display for ScanStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inputs for creating an incident. Validated by the service.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIncident {
    pub title: String,
    pub severity: String,
    pub service: String,
    pub environment: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Partial field update; `None` leaves the field untouched.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIncident {
    pub title: Option<String>,
    pub severity: Option<String>,
    pub service: Option<String>,
    pub environment: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl UpdateIncident {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.severity.is_none()
            && self.service.is_none()
            && self.environment.is_none()
            && self.tags.is_none()
    }
}

/// Filters for the incident listing. All are conjunctive; `search` is a
/// case-insensitive substring over title OR service.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentFilter {
    pub status: Option<String>,
    pub severity: Option<String>,
    pub environment: Option<String>,
    pub service: Option<String>,
    pub tag: Option<String>,
    pub assignee: Option<String>,
    pub search: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_totality() {
        assert_eq!(
            IncidentStatus::Open.allowed_transitions(),
            &[IncidentStatus::Mitigated, IncidentStatus::Resolved]
        );
        assert_eq!(
            IncidentStatus::Mitigated.allowed_transitions(),
            &[IncidentStatus::Resolved]
        );
        assert!(IncidentStatus::Resolved.allowed_transitions().is_empty());
    }

    #[test]
    fn test_self_transitions_rejected() {
        for status in [
            IncidentStatus::Open,
            IncidentStatus::Mitigated,
            IncidentStatus::Resolved,
        ] {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn test_bulk_reachability_includes_identity() {
        assert!(IncidentStatus::Resolved.has_path_to(IncidentStatus::Resolved));
        assert!(IncidentStatus::Open.has_path_to(IncidentStatus::Resolved));
        assert!(IncidentStatus::Mitigated.has_path_to(IncidentStatus::Resolved));
        assert!(!IncidentStatus::Resolved.has_path_to(IncidentStatus::Open));
        assert!(!IncidentStatus::Mitigated.has_path_to(IncidentStatus::Open));
    }

    #[test]
    fn test_resolved_is_terminal() {
        for target in [
            IncidentStatus::Open,
            IncidentStatus::Mitigated,
            IncidentStatus::Resolved,
        ] {
            assert!(!IncidentStatus::Resolved.can_transition_to(target));
        }
    }

    #[test]
    fn test_enum_round_trips() {
        assert_eq!("SEV1".parse::<Severity>().unwrap(), Severity::Sev1);
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!(
            "STATUS_CHANGE".parse::<EventType>().unwrap(),
            EventType::StatusChange
        );
        assert!("SEV5".parse::<Severity>().is_err());
        assert!("QA".parse::<Environment>().is_err());
    }

    #[test]
    fn test_status_serde_representation() {
        let json = serde_json::to_string(&IncidentStatus::Mitigated).unwrap();
        assert_eq!(json, "\"MITIGATED\"");
        let back: IncidentStatus = serde_json::from_str("\"RESOLVED\"").unwrap();
        assert_eq!(back, IncidentStatus::Resolved);
    }
}
