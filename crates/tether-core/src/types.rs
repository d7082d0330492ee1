//! Domain types shared between the controller, the simulator and the CLI.
//!
//! These types describe actuator state as it travels over the wire. They carry
//! no behavior beyond small validity helpers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{BehaviorName, ClientName};

/// Exclusive, time-bounded ownership of an actuator resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// The resource this lease covers (e.g. `"body"`).
    pub resource: String,
    /// The identity holding the lease.
    pub owner: ClientName,
    /// Monotonic per-resource counter; bumped by every acquire, take and renew.
    pub epoch: u64,
    /// When the lease lapses unless renewed.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Time left before the lease lapses, zero if already expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        (self.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Returns true once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Returns true if `self` supersedes `other` for the same resource.
    #[must_use]
    pub fn supersedes(&self, other: &Self) -> bool {
        self.resource == other.resource && self.epoch > other.epoch
    }
}

/// Gross power and posture status of the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    /// Motors are off.
    #[default]
    Off,
    /// Motors are powered, the actuator is sitting.
    On,
    /// Motors are powered and the actuator is standing.
    Standing,
}

impl PowerState {
    /// Returns true when motor power is on, standing or not.
    #[must_use]
    pub const fn is_on(&self) -> bool {
        matches!(self, Self::On | Self::Standing)
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::On => "on",
            Self::Standing => "standing",
        })
    }
}

/// Emergency-stop level reported by the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EstopLevel {
    /// No stop asserted; motion is allowed.
    #[default]
    None,
    /// Settle then cut power.
    SettleThenCut,
    /// Cut power immediately.
    Cut,
}

/// An 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Color {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Color {
    /// Create a color from its channels.
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Solid colors for each LED position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LedSequenceGroup {
    /// Front left LED.
    pub front_left: Option<Color>,
    /// Front center LED.
    pub front_center: Option<Color>,
    /// Front right LED.
    pub front_right: Option<Color>,
    /// Hind left LED.
    pub hind_left: Option<Color>,
    /// Hind right LED.
    pub hind_right: Option<Color>,
}

impl LedSequenceGroup {
    /// Every LED position set to the same color.
    #[must_use]
    pub const fn solid(color: Color) -> Self {
        Self {
            front_left: Some(color),
            front_center: Some(color),
            front_right: Some(color),
            hind_left: Some(color),
            hind_right: Some(color),
        }
    }

    /// Returns true if no LED position is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.front_left.is_none()
            && self.front_center.is_none()
            && self.front_right.is_none()
            && self.hind_left.is_none()
            && self.hind_right.is_none()
    }
}

/// A note of the diatonic scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Note {
    /// Do.
    C,
    /// Re.
    D,
    /// Mi.
    E,
    /// Fa.
    F,
    /// Sol.
    G,
    /// La.
    A,
    /// Si.
    B,
}

/// One buzzer note with its duration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuzzerNote {
    /// Pitch class.
    pub note: Note,
    /// Octave number.
    pub octave: u8,
    /// How long the note sounds, in milliseconds.
    pub duration_ms: u64,
}

impl BuzzerNote {
    /// Create a note sounding for `duration`.
    #[must_use]
    pub fn new(note: Note, octave: u8, duration: Duration) -> Self {
        Self {
            note,
            octave,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// The note duration.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Audio part of a behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AudioSequenceGroup {
    /// Buzzer notes played in order.
    pub buzzer: Vec<BuzzerNote>,
}

/// A prioritized light/sound output definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Behavior {
    /// Disabled behaviors are stored but never shown.
    pub enabled: bool,
    /// Higher wins when several behaviors could apply.
    pub priority: i32,
    /// Lighting payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leds: Option<LedSequenceGroup>,
    /// Audio payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioSequenceGroup>,
}

impl Behavior {
    /// An enabled behavior with no payloads yet.
    #[must_use]
    pub const fn new(priority: i32) -> Self {
        Self {
            enabled: true,
            priority,
            leds: None,
            audio: None,
        }
    }

    /// Attach a lighting payload.
    #[must_use]
    pub fn with_leds(mut self, leds: LedSequenceGroup) -> Self {
        self.leds = Some(leds);
        self
    }

    /// Attach an audio payload.
    #[must_use]
    pub fn with_audio(mut self, audio: AudioSequenceGroup) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Returns true if the behavior has at least one output channel.
    #[must_use]
    pub fn has_output(&self) -> bool {
        self.leds.as_ref().is_some_and(|l| !l.is_empty())
            || self.audio.as_ref().is_some_and(|a| !a.buzzer.is_empty())
    }
}

/// A behavior as currently registered on the actuator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveBehavior {
    /// Registered name.
    pub name: BehaviorName,
    /// Definition.
    pub behavior: Behavior,
    /// Permanent behaviors belong to the actuator and cannot be deleted.
    #[serde(default)]
    pub permanent: bool,
}

/// Global audio/visual system parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SystemParams {
    /// Whether the audio/visual system is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// LED brightness ceiling in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_brightness: Option<f64>,
    /// Buzzer volume ceiling in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buzzer_max_volume: Option<f64>,
}

impl SystemParams {
    /// Check that every set ratio lies in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::OutOfRange` naming the first offending field.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (field, value) in [
            ("max_brightness", self.max_brightness),
            ("buzzer_max_volume", self.buzzer_max_volume),
        ] {
            if let Some(value) = value {
                if !(0.0..=1.0).contains(&value) {
                    return Err(CoreError::OutOfRange {
                        field,
                        value,
                        min: 0.0,
                        max: 1.0,
                    });
                }
            }
        }
        Ok(())
    }

    /// Overlay the fields set in `update` onto `self`.
    #[must_use]
    pub fn merged(self, update: Self) -> Self {
        Self {
            enabled: update.enabled.or(self.enabled),
            max_brightness: update.max_brightness.or(self.max_brightness),
            buzzer_max_volume: update.buzzer_max_volume.or(self.buzzer_max_volume),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(epoch: u64, expires_in: chrono::Duration) -> Lease {
        Lease {
            resource: "body".to_string(),
            owner: ClientName::new("tester").unwrap(),
            epoch,
            expires_at: Utc::now() + expires_in,
        }
    }

    #[test]
    fn lease_expiry() {
        let live = lease(1, chrono::Duration::seconds(30));
        assert!(!live.is_expired());
        assert!(live.remaining() > Duration::from_secs(25));

        let dead = lease(1, chrono::Duration::seconds(-1));
        assert!(dead.is_expired());
        assert_eq!(dead.remaining(), Duration::ZERO);
    }

    #[test]
    fn lease_supersedes_only_same_resource() {
        let old = lease(3, chrono::Duration::seconds(5));
        let new = lease(4, chrono::Duration::seconds(5));
        assert!(new.supersedes(&old));
        assert!(!old.supersedes(&new));

        let mut other = new.clone();
        other.resource = "arm".to_string();
        assert!(!other.supersedes(&old));
    }

    #[test]
    fn power_state_is_on() {
        assert!(!PowerState::Off.is_on());
        assert!(PowerState::On.is_on());
        assert!(PowerState::Standing.is_on());
    }

    #[test]
    fn behavior_output_detection() {
        assert!(!Behavior::new(1).has_output());
        assert!(!Behavior::new(1)
            .with_leds(LedSequenceGroup::default())
            .has_output());
        assert!(Behavior::new(1)
            .with_leds(LedSequenceGroup::solid(Color::rgb(255, 0, 0)))
            .has_output());
        let audio = AudioSequenceGroup {
            buzzer: vec![BuzzerNote::new(Note::C, 4, Duration::from_millis(700))],
        };
        assert!(Behavior::new(1).with_audio(audio).has_output());
    }

    #[test]
    fn buzzer_note_duration() {
        let note = BuzzerNote::new(Note::G, 4, Duration::from_millis(700));
        assert_eq!(note.duration_ms, 700);
        assert_eq!(note.duration(), Duration::from_millis(700));
    }

    #[test]
    fn system_params_validation() {
        let ok = SystemParams {
            buzzer_max_volume: Some(0.5),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let bad = SystemParams {
            max_brightness: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(CoreError::OutOfRange {
                field: "max_brightness",
                ..
            })
        ));
    }

    #[test]
    fn system_params_merge() {
        let current = SystemParams {
            enabled: Some(true),
            max_brightness: Some(1.0),
            buzzer_max_volume: Some(1.0),
        };
        let update = SystemParams {
            buzzer_max_volume: Some(0.5),
            ..Default::default()
        };
        let merged = current.merged(update);
        assert_eq!(merged.enabled, Some(true));
        assert_eq!(merged.max_brightness, Some(1.0));
        assert_eq!(merged.buzzer_max_volume, Some(0.5));
    }

    #[test]
    fn power_state_serde() {
        assert_eq!(
            serde_json::to_string(&PowerState::Standing).unwrap(),
            "\"standing\""
        );
        let parsed: EstopLevel = serde_json::from_str("\"settle_then_cut\"").unwrap();
        assert_eq!(parsed, EstopLevel::SettleThenCut);
    }
}
