//! Behavior steps for the built-in routines.

use std::time::Duration;

use anyhow::{Context, Result};
use tether_control::BehaviorStep;
use tether_core::{
    AudioSequenceGroup, Behavior, BehaviorName, BuzzerNote, Color, LedSequenceGroup, Note,
    SystemParams,
};

/// Longest step accepted on the command line, one day.
const MAX_SECONDS: f64 = 86_400.0;

/// Octave every scale note is played in.
pub const SCALE_OCTAVE: u8 = 4;

/// Solfège names, notes and colors of the scale, Do to Si.
const SCALE: [(&str, Note, Color); 7] = [
    ("do", Note::C, Color::rgb(255, 0, 0)),
    ("re", Note::D, Color::rgb(255, 128, 0)),
    ("mi", Note::E, Color::rgb(255, 255, 0)),
    ("fa", Note::F, Color::rgb(0, 255, 0)),
    ("sol", Note::G, Color::rgb(0, 255, 255)),
    ("la", Note::A, Color::rgb(0, 0, 255)),
    ("si", Note::B, Color::rgb(127, 0, 255)),
];

/// One step per note of the scale, each lit in its own color.
pub fn scale_steps(note_duration: Duration) -> Result<Vec<BehaviorStep>> {
    SCALE
        .iter()
        .map(|&(solfege, note, color)| -> Result<BehaviorStep> {
            let name = BehaviorName::new(format!("note_{solfege}"))?;
            let audio = AudioSequenceGroup {
                buzzer: vec![BuzzerNote::new(note, SCALE_OCTAVE, note_duration)],
            };
            let behavior = Behavior::new(0)
                .with_leds(LedSequenceGroup::solid(color))
                .with_audio(audio);
            Ok(BehaviorStep::new(name, behavior, note_duration))
        })
        .collect()
}

/// System parameters enabling the buzzer at `volume`.
#[must_use]
pub const fn scale_params(volume: f64) -> SystemParams {
    SystemParams {
        enabled: Some(true),
        max_brightness: None,
        buzzer_max_volume: Some(volume),
    }
}

/// One LED-only step per color, shown in order.
pub fn light_steps(colors: &[Color], each: Duration) -> Result<Vec<BehaviorStep>> {
    colors
        .iter()
        .enumerate()
        .map(|(i, color)| -> Result<BehaviorStep> {
            let raw = format!("light_{}_{:02x}{:02x}{:02x}", i + 1, color.r, color.g, color.b);
            let name = BehaviorName::new(raw).context("building light behavior name")?;
            let behavior = Behavior::new(0).with_leds(LedSequenceGroup::solid(*color));
            Ok(BehaviorStep::new(name, behavior, each))
        })
        .collect()
}

/// Parse `R,G,B` with each channel in `0..=255`.
pub fn parse_rgb(s: &str) -> std::result::Result<Color, String> {
    let channels = s
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid color {s:?}: {e}"))?;

    match channels.as_slice() {
        &[r, g, b] => Ok(Color::rgb(r, g, b)),
        _ => Err(format!("expected R,G,B, got {s:?}")),
    }
}

/// Parse a positive number of seconds, fractions allowed, to the millisecond.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_seconds(s: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid duration {s:?}: {e}"))?;
    if !secs.is_finite() || secs > MAX_SECONDS {
        return Err(format!("duration out of range: {s:?}"));
    }
    let millis = (secs * 1000.0).round();
    if millis < 1.0 {
        return Err(format!("duration must be positive, got {s:?}"));
    }
    Ok(Duration::from_millis(millis as u64))
}
