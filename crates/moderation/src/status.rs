//! Moderation outcome and risk classification.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use folio_core::DomainError;

/// Outcome of external content review for a media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    Approved,
    Rejected,
    Flagged,
    Pending,
    Error,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Approved => "approved",
            ModerationStatus::Rejected => "rejected",
            ModerationStatus::Flagged => "flagged",
            ModerationStatus::Pending => "pending",
            ModerationStatus::Error => "error",
        }
    }

    /// Whether this status represents a settled review outcome.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            ModerationStatus::Approved | ModerationStatus::Rejected | ModerationStatus::Flagged
        )
    }

    /// Lifecycle folder a media file belongs in under this status.
    ///
    /// Flagged content is quarantined pending human review; unresolved
    /// statuses keep the file in the upload staging area.
    pub fn lifecycle_folder(&self) -> &'static str {
        match self {
            ModerationStatus::Approved => "media/approved",
            ModerationStatus::Rejected => "media/rejected",
            ModerationStatus::Flagged => "media/quarantine",
            ModerationStatus::Pending | ModerationStatus::Error => "media-temp",
        }
    }
}

impl core::fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModerationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(ModerationStatus::Approved),
            "rejected" => Ok(ModerationStatus::Rejected),
            "flagged" => Ok(ModerationStatus::Flagged),
            "pending" => Ok(ModerationStatus::Pending),
            "error" => Ok(ModerationStatus::Error),
            other => Err(DomainError::validation(format!(
                "unknown moderation status: {other}"
            ))),
        }
    }
}

/// Risk classification derived from the moderation service's scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Map a 0-100 risk score onto a level.
    ///
    /// Thresholds match the moderation service: >= 80 high, >= 50 medium,
    /// >= 20 low, else minimal.
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            RiskLevel::High
        } else if score >= 50.0 {
            RiskLevel::Medium
        } else if score >= 20.0 {
            RiskLevel::Low
        } else {
            RiskLevel::Minimal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Minimal => "minimal",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl core::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimal" => Ok(RiskLevel::Minimal),
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            other => Err(DomainError::validation(format!(
                "unknown risk level: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_thresholds() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Minimal);
        assert_eq!(RiskLevel::from_score(19.9), RiskLevel::Minimal);
        assert_eq!(RiskLevel::from_score(20.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(50.0), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(80.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(100.0), RiskLevel::High);
    }

    #[test]
    fn lifecycle_folders_cover_all_statuses() {
        assert_eq!(ModerationStatus::Approved.lifecycle_folder(), "media/approved");
        assert_eq!(ModerationStatus::Rejected.lifecycle_folder(), "media/rejected");
        assert_eq!(ModerationStatus::Flagged.lifecycle_folder(), "media/quarantine");
        assert_eq!(ModerationStatus::Pending.lifecycle_folder(), "media-temp");
        assert_eq!(ModerationStatus::Error.lifecycle_folder(), "media-temp");
    }

    #[test]
    fn status_round_trips_via_str() {
        for s in ["approved", "rejected", "flagged", "pending", "error"] {
            let parsed: ModerationStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("deleted".parse::<ModerationStatus>().is_err());
    }
}
