use serde::{Deserialize, Serialize};

use super::evaluator::AccessState;

/// Proof that the caller was inside the geofence when it asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnlockGrant;

/// Why an unlock request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    TooFar,
    NoLocation,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::TooFar => "too_far",
            DenialReason::NoLocation => "no_location",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            DenialReason::TooFar => "You are too far from the property to unlock it.",
            DenialReason::NoLocation => "Getting your location...",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unlock denied: {}", .reason.code())]
pub struct UnlockDenied {
    pub reason: DenialReason,
}

/// Permit the unlock only while the session is `Unlocked`.
pub fn request_unlock(state: AccessState) -> Result<UnlockGrant, UnlockDenied> {
    match state {
        AccessState::Unlocked => Ok(UnlockGrant),
        AccessState::Locked => Err(UnlockDenied {
            reason: DenialReason::TooFar,
        }),
        AccessState::Unknown => Err(UnlockDenied {
            reason: DenialReason::NoLocation,
        }),
    }
}

/// Downstream side effect invoked after a grant, e.g. a smart-lock call.
pub trait UnlockActuator: Send + Sync {
    fn unlock(&self, estate_id: &str, grant: UnlockGrant) -> Result<String, ActuatorError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("unlock actuator unavailable: {0}")]
    Unavailable(String),
}

/// Stand-in actuator that only confirms.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfirmingActuator;

impl UnlockActuator for ConfirmingActuator {
    fn unlock(&self, estate_id: &str, _grant: UnlockGrant) -> Result<String, ActuatorError> {
        tracing::info!(estate_id, "property unlock confirmed");
        Ok("Property unlocked!".to_string())
    }
}

/// Owner contact offered when the caller is too far away to unlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnerContact {
    pub phone: String,
}

impl OwnerContact {
    pub fn new(phone: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
        }
    }

    /// `tel:` URI with formatting characters stripped.
    pub fn dial_uri(&self) -> String {
        let digits: String = self
            .phone
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();
        format!("tel:{digits}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_only_when_unlocked() {
        assert_eq!(request_unlock(AccessState::Unlocked), Ok(UnlockGrant));
        assert_eq!(
            request_unlock(AccessState::Locked),
            Err(UnlockDenied {
                reason: DenialReason::TooFar
            })
        );
        assert_eq!(
            request_unlock(AccessState::Unknown),
            Err(UnlockDenied {
                reason: DenialReason::NoLocation
            })
        );
    }

    #[test]
    fn denial_codes_are_distinct() {
        assert_eq!(DenialReason::TooFar.code(), "too_far");
        assert_eq!(DenialReason::NoLocation.code(), "no_location");
        let err = request_unlock(AccessState::Locked).expect_err("denied");
        assert_eq!(err.to_string(), "unlock denied: too_far");
    }

    #[test]
    fn confirming_actuator_returns_message() {
        let message = ConfirmingActuator
            .unlock("7", UnlockGrant)
            .expect("confirms");
        assert_eq!(message, "Property unlocked!");
    }

    #[test]
    fn dial_uri_strips_formatting() {
        assert_eq!(
            OwnerContact::new("+1 (555) 010-2030").dial_uri(),
            "tel:+15550102030"
        );
    }
}
