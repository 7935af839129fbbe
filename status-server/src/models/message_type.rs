//! Semantic tags for status messages

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What caused a disruption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cause {
    TrainBreakdown,
    Passenger,
    Signalling,
    Power,
    Infrastructure,
}

/// How service is affected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceState {
    Halted,
    Slow,
    Delayed,
}

/// Expected duration announced by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outlook {
    Short,
    Long,
    Unknown,
}

/// Classified status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum MessageType {
    /// Unclassified free text
    Raw,
    GenericDisturbance,
    /// Fully resolved, regular service
    RegularService,
    /// Closed for service
    Closed,
    SpecialService,
    ReportBegin,
    ReportConfirm,
    ReportReconfirm,
    ReportSolved,
    Composite {
        cause: Cause,
        state: ServiceState,
        outlook: Outlook,
    },
}

impl Cause {
    fn as_str(self) -> &'static str {
        match self {
            Cause::TrainBreakdown => "train-breakdown",
            Cause::Passenger => "passenger",
            Cause::Signalling => "signalling",
            Cause::Power => "power",
            Cause::Infrastructure => "infrastructure",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "train-breakdown" => Cause::TrainBreakdown,
            "passenger" => Cause::Passenger,
            "signalling" => Cause::Signalling,
            "power" => Cause::Power,
            "infrastructure" => Cause::Infrastructure,
            _ => return None,
        })
    }
}

impl ServiceState {
    fn as_str(self) -> &'static str {
        match self {
            ServiceState::Halted => "halted",
            ServiceState::Slow => "slow",
            ServiceState::Delayed => "delayed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "halted" => ServiceState::Halted,
            "slow" => ServiceState::Slow,
            "delayed" => ServiceState::Delayed,
            _ => return None,
        })
    }
}

impl Outlook {
    fn as_str(self) -> &'static str {
        match self {
            Outlook::Short => "short",
            Outlook::Long => "long",
            Outlook::Unknown => "unknown",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "short" => Outlook::Short,
            "long" => Outlook::Long,
            "unknown" => Outlook::Unknown,
            _ => return None,
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Raw => f.write_str("raw"),
            MessageType::GenericDisturbance => f.write_str("generic-disturbance"),
            MessageType::RegularService => f.write_str("regular-service"),
            MessageType::Closed => f.write_str("closed"),
            MessageType::SpecialService => f.write_str("special-service"),
            MessageType::ReportBegin => f.write_str("report-begin"),
            MessageType::ReportConfirm => f.write_str("report-confirm"),
            MessageType::ReportReconfirm => f.write_str("report-reconfirm"),
            MessageType::ReportSolved => f.write_str("report-solved"),
            MessageType::Composite { cause, state, outlook } => {
                write!(f, "composite/{}/{}/{}", cause.as_str(), state.as_str(), outlook.as_str())
            }
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    /// Unknown tags are an error; callers decide whether to fall back to `Raw`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "raw" => MessageType::Raw,
            "generic-disturbance" => MessageType::GenericDisturbance,
            "regular-service" => MessageType::RegularService,
            "closed" => MessageType::Closed,
            "special-service" => MessageType::SpecialService,
            "report-begin" => MessageType::ReportBegin,
            "report-confirm" => MessageType::ReportConfirm,
            "report-reconfirm" => MessageType::ReportReconfirm,
            "report-solved" => MessageType::ReportSolved,
            other => {
                let mut parts = other.split('/');
                let composite = match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
                    (Some("composite"), Some(c), Some(st), Some(o), None) => {
                        match (Cause::parse(c), ServiceState::parse(st), Outlook::parse(o)) {
                            (Some(cause), Some(state), Some(outlook)) => {
                                Some(MessageType::Composite { cause, state, outlook })
                            }
                            _ => None,
                        }
                    }
                    _ => None,
                };
                return composite.ok_or_else(|| format!("unknown message type tag: {other}"));
            }
        })
    }
}
