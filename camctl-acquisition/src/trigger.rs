//! Contrôle du mode de déclenchement
//!
//! Ce module traduit une politique de déclenchement (interne, ligne d'entrée,
//! logiciel) en réglages `TriggerSelector` / `TriggerMode` / `TriggerSource` /
//! `TriggerActivation`. Tous les sélecteurs sont d'abord désactivés, puis un
//! seul est activé.

use std::fmt;
use std::str::FromStr;

use camctl_camera::{CameraControl, RegisterValue};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{AcquisitionError, Result};

/// Ligne d'entrée de déclenchement matériel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerLine {
    /// Ligne d'entrée 1
    Line1,

    /// Ligne d'entrée 2
    Line2,

    /// Ligne d'entrée 3
    Line3,

    /// Ligne d'entrée 4
    Line4,
}

impl TriggerLine {
    /// Valeur GenICam de `TriggerSource`
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerLine::Line1 => "Line1",
            TriggerLine::Line2 => "Line2",
            TriggerLine::Line3 => "Line3",
            TriggerLine::Line4 => "Line4",
        }
    }

    fn from_index(index: u8) -> Option<Self> {
        match index {
            1 => Some(TriggerLine::Line1),
            2 => Some(TriggerLine::Line2),
            3 => Some(TriggerLine::Line3),
            4 => Some(TriggerLine::Line4),
            _ => None,
        }
    }
}

impl fmt::Display for TriggerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerLine::Line1 => write!(f, "Ligne 1"),
            TriggerLine::Line2 => write!(f, "Ligne 2"),
            TriggerLine::Line3 => write!(f, "Ligne 3"),
            TriggerLine::Line4 => write!(f, "Ligne 4"),
        }
    }
}

/// Front ou niveau actif d'un déclenchement matériel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerActivation {
    #[default]
    RisingEdge,
    FallingEdge,
    AnyEdge,
    LevelHigh,
    LevelLow,
}

impl TriggerActivation {
    const ALL: [TriggerActivation; 5] = [
        TriggerActivation::RisingEdge,
        TriggerActivation::FallingEdge,
        TriggerActivation::AnyEdge,
        TriggerActivation::LevelHigh,
        TriggerActivation::LevelLow,
    ];

    /// Valeur GenICam de `TriggerActivation`
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerActivation::RisingEdge => "RisingEdge",
            TriggerActivation::FallingEdge => "FallingEdge",
            TriggerActivation::AnyEdge => "AnyEdge",
            TriggerActivation::LevelHigh => "LevelHigh",
            TriggerActivation::LevelLow => "LevelLow",
        }
    }
}

/// Politique de déclenchement des images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TriggerPolicy {
    /// Cadence interne de la caméra (freerun)
    #[default]
    Internal,

    /// Déclenchement matériel sur une ligne d'entrée
    Line {
        line: TriggerLine,
        activation: TriggerActivation,
    },

    /// Déclenchement logiciel, une commande par image
    Software,
}

impl TriggerPolicy {
    /// Déclenchement sur front montant d'une ligne
    pub fn line(line: TriggerLine) -> Self {
        TriggerPolicy::Line {
            line,
            activation: TriggerActivation::default(),
        }
    }

    pub fn is_software(&self) -> bool {
        matches!(self, TriggerPolicy::Software)
    }

    /// Valeur de `TriggerSource` à activer, `None` en mode interne
    pub fn source(&self) -> Option<&'static str> {
        match self {
            TriggerPolicy::Internal => None,
            TriggerPolicy::Line { line, .. } => Some(line.as_str()),
            TriggerPolicy::Software => Some("Software"),
        }
    }

    /// État de déclenchement obtenu une fois la politique appliquée
    pub fn state(&self) -> TriggerState {
        match self {
            TriggerPolicy::Internal => TriggerState::Internal,
            TriggerPolicy::Line { .. } => TriggerState::LineTriggered,
            TriggerPolicy::Software => TriggerState::SoftwareTriggered,
        }
    }
}

impl fmt::Display for TriggerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerPolicy::Internal => write!(f, "internal"),
            TriggerPolicy::Software => write!(f, "software"),
            TriggerPolicy::Line { line, activation } => {
                write!(f, "{}", line.as_str().to_lowercase())?;
                if *activation != TriggerActivation::default() {
                    write!(f, ":{}", activation.as_str())?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for TriggerPolicy {
    type Err = AcquisitionError;

    /// Accepte `internal`, `software`, `line1`..`line4`, éventuellement suivi
    /// de `:<activation>` (ex: `line2:FallingEdge`)
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || AcquisitionError::InvalidPlan(format!("déclenchement inconnu: {}", s));
        let text = s.trim().to_lowercase();

        match text.as_str() {
            "internal" => return Ok(TriggerPolicy::Internal),
            "software" => return Ok(TriggerPolicy::Software),
            _ => {}
        }

        let (line, activation) = match text.split_once(':') {
            Some((line, activation)) => (line, Some(activation)),
            None => (text.as_str(), None),
        };

        let line = line
            .strip_prefix("line")
            .and_then(|index| index.parse::<u8>().ok())
            .and_then(TriggerLine::from_index)
            .ok_or_else(invalid)?;

        let activation = match activation {
            None => TriggerActivation::default(),
            Some(name) => TriggerActivation::ALL
                .iter()
                .copied()
                .find(|a| a.as_str().eq_ignore_ascii_case(name))
                .ok_or_else(invalid)?,
        };

        Ok(TriggerPolicy::Line { line, activation })
    }
}

impl TryFrom<String> for TriggerPolicy {
    type Error = AcquisitionError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TriggerPolicy> for String {
    fn from(policy: TriggerPolicy) -> Self {
        policy.to_string()
    }
}

/// État de déclenchement d'une caméra
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerState {
    /// Aucune politique appliquée
    Off,

    /// Cadence interne
    Internal,

    /// Déclenchement par ligne d'entrée
    LineTriggered,

    /// Déclenchement logiciel
    SoftwareTriggered,
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerState::Off => write!(f, "Désactivé"),
            TriggerState::Internal => write!(f, "Interne"),
            TriggerState::LineTriggered => write!(f, "Matériel"),
            TriggerState::SoftwareTriggered => write!(f, "Logiciel"),
        }
    }
}

/// Applique une politique de déclenchement
///
/// Retourne `Ok(None)` sans rien écrire lorsque `TriggerSelector` n'est pas
/// modifiable sur cette caméra.
pub fn set_trigger<C>(camera: &mut C, policy: &TriggerPolicy) -> Result<Option<TriggerState>>
where
    C: CameraControl + ?Sized,
{
    if !camera.is_writable("TriggerSelector") {
        warn!(
            "TriggerSelector non modifiable sur {}: déclenchement {} ignoré",
            camera.device_info().friendly_name,
            policy
        );
        return Ok(None);
    }

    let selectors = camera.symbolics("TriggerSelector")?;

    // Désactiver tous les sélecteurs avant d'en activer un seul
    for selector in &selectors {
        camera.set("TriggerSelector", RegisterValue::symbol(selector.as_str()))?;
        camera.set("TriggerMode", RegisterValue::symbol("Off"))?;
    }

    if let Some(source) = policy.source() {
        let selector = selectors
            .iter()
            .find(|s| s.as_str() == "FrameStart")
            .or_else(|| selectors.first())
            .ok_or_else(|| {
                AcquisitionError::CapabilityUnsupported(
                    "TriggerSelector sans valeur disponible".to_string(),
                )
            })?;

        debug!("Activation du déclenchement {} sur {}", source, selector);
        camera.set("TriggerSelector", RegisterValue::symbol(selector.as_str()))?;
        camera.set("TriggerMode", RegisterValue::symbol("On"))?;
        camera.set("TriggerSource", RegisterValue::symbol(source))?;

        if let TriggerPolicy::Line { activation, .. } = policy {
            camera.set("TriggerActivation", RegisterValue::symbol(activation.as_str()))?;
        }
    }

    camera.set("AcquisitionMode", RegisterValue::symbol("Continuous"))?;

    let state = policy.state();
    info!(
        "Déclenchement {} appliqué sur {}",
        state,
        camera.device_info().friendly_name
    );
    Ok(Some(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCamera;
    use camctl_camera::{AccessMode, SimulatedCamera};
    use std::sync::{Arc, Mutex};
    use test_case::test_case;

    #[test_case("internal", TriggerPolicy::Internal ; "interne")]
    #[test_case("Software", TriggerPolicy::Software ; "logiciel")]
    #[test_case("line1", TriggerPolicy::line(TriggerLine::Line1) ; "ligne 1")]
    #[test_case("LINE4", TriggerPolicy::line(TriggerLine::Line4) ; "ligne 4 majuscules")]
    #[test_case(
        "line2:fallingedge",
        TriggerPolicy::Line { line: TriggerLine::Line2, activation: TriggerActivation::FallingEdge }
        ; "ligne 2 front descendant"
    )]
    fn test_parse_policy(input: &str, expected: TriggerPolicy) {
        assert_eq!(input.parse::<TriggerPolicy>().unwrap(), expected);
    }

    #[test_case("line5" ; "ligne inexistante")]
    #[test_case("external" ; "nom inconnu")]
    #[test_case("line1:sideways" ; "activation inconnue")]
    fn test_parse_policy_rejects(input: &str) {
        assert!(matches!(
            input.parse::<TriggerPolicy>(),
            Err(AcquisitionError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_policy_display_round_trips() {
        let policy = TriggerPolicy::Line {
            line: TriggerLine::Line3,
            activation: TriggerActivation::LevelHigh,
        };
        assert_eq!(policy.to_string(), "line3:LevelHigh");
        assert_eq!(policy.to_string().parse::<TriggerPolicy>().unwrap(), policy);
        assert_eq!(TriggerPolicy::line(TriggerLine::Line1).to_string(), "line1");
    }

    #[test]
    fn test_software_trigger_on_simulator() {
        let mut camera = SimulatedCamera::gige("sim");
        let state = set_trigger(&mut camera, &TriggerPolicy::Software).unwrap();
        assert_eq!(state, Some(TriggerState::SoftwareTriggered));

        let on = RegisterValue::symbol("On");
        assert_eq!(camera.trigger_slot("FrameStart", "TriggerMode"), Some(&on));
        assert_eq!(
            camera.trigger_slot("FrameStart", "TriggerSource"),
            Some(&RegisterValue::symbol("Software"))
        );
        assert_eq!(
            camera.trigger_slot("AcquisitionStart", "TriggerMode"),
            Some(&RegisterValue::symbol("Off"))
        );
        assert_eq!(camera.writes_to("TriggerMode").iter().filter(|v| ***v == on).count(), 1);
        assert_eq!(
            camera.writes().last().map(|(name, _)| name.as_str()),
            Some("AcquisitionMode")
        );
    }

    #[test]
    fn test_line_trigger_without_frame_start_uses_first_selector() {
        let mut camera =
            SimulatedCamera::usb3("sim").with_trigger_selectors(&["LineStart", "AcquisitionStart"]);
        let policy = TriggerPolicy::Line {
            line: TriggerLine::Line2,
            activation: TriggerActivation::FallingEdge,
        };
        set_trigger(&mut camera, &policy).unwrap();

        assert_eq!(
            camera.trigger_slot("LineStart", "TriggerSource"),
            Some(&RegisterValue::symbol("Line2"))
        );
        assert_eq!(
            camera.trigger_slot("LineStart", "TriggerActivation"),
            Some(&RegisterValue::symbol("FallingEdge"))
        );
        assert_eq!(
            camera.trigger_slot("AcquisitionStart", "TriggerMode"),
            Some(&RegisterValue::symbol("Off"))
        );
    }

    #[test]
    fn test_internal_trigger_only_resets() {
        let mut camera = SimulatedCamera::gige("sim");
        set_trigger(&mut camera, &TriggerPolicy::Software).unwrap();
        camera.clear_writes();

        assert_eq!(
            set_trigger(&mut camera, &TriggerPolicy::Internal).unwrap(),
            Some(TriggerState::Internal)
        );
        assert!(camera.writes_to("TriggerSource").is_empty());
        assert_eq!(camera.writes_to("TriggerMode").len(), 2);
        assert_eq!(
            camera.trigger_slot("FrameStart", "TriggerMode"),
            Some(&RegisterValue::symbol("Off"))
        );
    }

    #[test]
    fn test_locked_selector_is_benign() {
        let mut camera =
            SimulatedCamera::gige("sim").with_access("TriggerSelector", AccessMode::ReadOnly);

        assert_eq!(set_trigger(&mut camera, &TriggerPolicy::Software).unwrap(), None);
        assert_eq!(camera.write_count(), 0);
    }

    #[test]
    fn test_software_trigger_call_order() {
        let mut camera = MockCamera::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        camera
            .expect_access_mode()
            .returning(|_| AccessMode::ReadWrite);
        camera
            .expect_device_info()
            .return_const(crate::testing::device_info());
        camera
            .expect_symbolics()
            .times(1)
            .returning(|_| Ok(vec!["AcquisitionStart".to_string(), "FrameStart".to_string()]));

        let log = Arc::clone(&calls);
        camera.expect_set().times(8).returning(move |name, value| {
            log.lock().unwrap().push((name.to_string(), value));
            Ok(())
        });

        set_trigger(&mut camera, &TriggerPolicy::Software).unwrap();

        let expected: Vec<(String, RegisterValue)> = [
            ("TriggerSelector", "AcquisitionStart"),
            ("TriggerMode", "Off"),
            ("TriggerSelector", "FrameStart"),
            ("TriggerMode", "Off"),
            ("TriggerSelector", "FrameStart"),
            ("TriggerMode", "On"),
            ("TriggerSource", "Software"),
            ("AcquisitionMode", "Continuous"),
        ]
        .iter()
        .map(|(name, symbol)| (name.to_string(), RegisterValue::symbol(*symbol)))
        .collect();
        assert_eq!(*calls.lock().unwrap(), expected);
    }
}
