// Message types: joystick frames in, drive commands out

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// One axis reading from the gamepad
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    #[serde(default, deserialize_with = "lenient_index")]
    pub index: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub value: f32,
}

/// Button values arrive either as pressure (0.0..1.0) or as a plain flag
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ButtonValue {
    Pressed(bool),
    Pressure(f64),
}

impl Default for ButtonValue {
    fn default() -> Self {
        Self::Pressed(false)
    }
}

// Anything that is neither a flag nor a number reads as released
impl<'de> Deserialize<'de> for ButtonValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value {
            serde_json::Value::Bool(pressed) => ButtonValue::Pressed(pressed),
            serde_json::Value::Number(n) => ButtonValue::Pressure(n.as_f64().unwrap_or(0.0)),
            _ => ButtonValue::default(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Button {
    #[serde(default, deserialize_with = "lenient_index")]
    pub index: Option<i64>,
    #[serde(default)]
    pub value: ButtonValue,
}

/// A single gamepad snapshot as sent by the browser
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoystickFrame {
    #[serde(default, deserialize_with = "lenient_list")]
    pub axes: Vec<Axis>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub buttons: Vec<Button>,
}

impl JoystickFrame {
    /// Build a frame from `(index, value)` axis pairs
    pub fn from_axes(axes: &[(i64, f32)]) -> Self {
        Self {
            axes: axes
                .iter()
                .map(|&(index, value)| Axis {
                    index: Some(index),
                    value,
                })
                .collect(),
            buttons: Vec::new(),
        }
    }

    /// Value of the first axis with the given index, 0.0 when absent
    pub fn axis(&self, index: i64) -> f32 {
        self.axes
            .iter()
            .find(|axis| axis.index == Some(index))
            .map(|axis| axis.value)
            .unwrap_or(0.0)
    }
}

// Axis values may be numbers or numeric strings; anything else reads as 0.0
fn lenient_f32<'de, D>(deserializer: D) -> Result<f32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0) as f32,
        serde_json::Value::String(s) => s.trim().parse::<f32>().unwrap_or(0.0),
        _ => 0.0,
    })
}

// Indices may arrive as 1, 1.0 or "1"; anything non-integral matches no axis
fn lenient_index<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let index = match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().and_then(integral),
        _ => None,
    };
    Ok(index)
}

fn integral(x: f64) -> Option<i64> {
    (x.is_finite() && x.fract() == 0.0).then_some(x as i64)
}

// Entries that are not objects are skipped; a non-array reads as empty
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(entries) => entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// Rotation direction for one drive side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Forward,
    Backward,
    #[default]
    Stop,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "FORWARD",
            Direction::Backward => "BACKWARD",
            Direction::Stop => "STOP",
        }
    }

    /// FORWARD <-> BACKWARD, STOP stays STOP
    pub fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
            Direction::Stop => Direction::Stop,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speed plus a direction for each side of the rover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriveCommand {
    pub speed: u8,
    pub left: Direction,
    pub right: Direction,
}

impl DriveCommand {
    pub fn new(speed: u8, left: Direction, right: Direction) -> Self {
        Self { speed, left, right }
    }

    pub fn stop() -> Self {
        Self::default()
    }

    /// Wire line for the left side controller
    pub fn left_line(&self) -> String {
        wire_line(self.left, self.speed)
    }

    /// Wire line for the right side controller
    pub fn right_line(&self) -> String {
        wire_line(self.right, self.speed)
    }
}

/// Format one motor controller line: `DIR:<dir>,SPEED:<n>\n`
pub fn wire_line(direction: Direction, speed: u8) -> String {
    format!("DIR:{},SPEED:{}\n", direction, speed)
}

/// Lifecycle state of a serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    #[default]
    Uninitialized,
    Open,
    Failed,
}

/// Health of both motor links, published when either changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkHealth {
    pub left: LinkState,
    pub right: LinkState,
}
