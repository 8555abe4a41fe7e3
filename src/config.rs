//! Application-level configuration: machine link, stepper and wheel calibration, and turn rules.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    controller::{HeartbeatSettings, LinkSettings, Strobe},
    protocol::{Axis, FailsafeKind, MachineKind},
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "ARCADE_RELAY_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Machine identity and address.
    pub machine: MachineSettings,
    /// Keepalive timings.
    pub heartbeat: HeartbeatConfig,
    /// Stepper calibration.
    pub steppers: SteppersConfig,
    /// Launch wheel calibration.
    pub wheels: WheelsConfig,
    /// Ball release and shot resolution.
    pub shot: ShotSettings,
    /// Claw-specific timings.
    pub claw: ClawSettings,
    /// Queue and turn rules.
    pub turn: TurnSettings,
    /// Light show fired by the `strobe` chat command.
    pub strobe: Strobe,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        machine = %app_config.machine.name,
                        kind = ?app_config.machine.kind,
                        "loaded machine config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Link parameters derived from the machine and heartbeat sections.
    pub fn link_settings(&self) -> LinkSettings {
        LinkSettings {
            address: self.machine.address.clone(),
            port: self.machine.port,
            comms_timeout: Duration::from_millis(self.machine.comms_timeout_ms),
            heartbeat: HeartbeatSettings {
                ping_timeout: Duration::from_millis(self.heartbeat.ping_timeout_ms),
                cooldown: Duration::from_millis(self.heartbeat.cooldown_ms),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// HTTP listener settings.
pub struct ServerSettings {
    /// Port, overridden by `PORT` or `SERVER_PORT`.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Which machine to drive and where it lives.
pub struct MachineSettings {
    /// Display name used in logs.
    pub name: String,
    /// Hardware family.
    pub kind: MachineKind,
    /// Host name or IP address.
    pub address: String,
    /// TCP port.
    pub port: u16,
    /// Bound for connecting and for synchronous replies.
    pub comms_timeout_ms: u64,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            name: "skeeball".into(),
            kind: MachineKind::Skeeball,
            address: "127.0.0.1".into(),
            port: 4000,
            comms_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Keepalive timings in milliseconds.
pub struct HeartbeatConfig {
    /// Ceiling for a pong to arrive.
    pub ping_timeout_ms: u64,
    /// Pause between pings.
    pub cooldown_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_timeout_ms: 5_000,
            cooldown_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Calibration of both stepper axes.
pub struct SteppersConfig {
    /// Left-right carriage.
    pub lr: StepperSettings,
    /// Pan rotation.
    pub pan: StepperSettings,
}

impl SteppersConfig {
    /// Settings for `axis`.
    pub fn get(&self, axis: Axis) -> &StepperSettings {
        match axis {
            Axis::LeftRight => &self.lr,
            Axis::Pan => &self.pan,
        }
    }
}

impl Default for SteppersConfig {
    fn default() -> Self {
        Self {
            lr: StepperSettings {
                axis: Axis::LeftRight,
                acceleration: 8_000,
                speed: 4_000,
                limit_high: 9_000,
                limit_low: 0,
                move_steps_normal: 300,
                move_steps_small: 100,
                default_position: 4_500,
                fallback_timeout_ms: 2_000,
            },
            pan: StepperSettings {
                axis: Axis::Pan,
                acceleration: 4_000,
                speed: 2_000,
                limit_high: 1_600,
                limit_low: 0,
                move_steps_normal: 40,
                move_steps_small: 10,
                default_position: 800,
                fallback_timeout_ms: 2_000,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
/// Calibration of one stepper.
pub struct StepperSettings {
    /// Axis driven by this stepper.
    pub axis: Axis,
    /// Acceleration sent with `sa`.
    pub acceleration: i32,
    /// Top speed sent with `ss`.
    pub speed: i32,
    /// Upper soft limit.
    pub limit_high: i32,
    /// Lower soft limit.
    pub limit_low: i32,
    /// Steps for a regular relative move.
    pub move_steps_normal: i32,
    /// Steps for a fine relative move.
    pub move_steps_small: i32,
    /// Position restored after homing and for new players.
    pub default_position: i32,
    /// How long a movement may go unconfirmed before the axis is released anyway.
    #[serde(default = "default_fallback_timeout_ms")]
    pub fallback_timeout_ms: u64,
}

impl StepperSettings {
    /// Fallback timeout as a [`Duration`].
    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }
}

fn default_fallback_timeout_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Calibration of both launch wheels.
pub struct WheelsConfig {
    /// Left wheel.
    pub left: WheelSettings,
    /// Right wheel.
    pub right: WheelSettings,
}

impl Default for WheelsConfig {
    fn default() -> Self {
        Self {
            left: WheelSettings {
                id: 1,
                default_speed: 85,
                multiplier: 1,
                map_speed_low: 0,
                map_speed_high: 255,
            },
            right: WheelSettings {
                id: 2,
                default_speed: 85,
                multiplier: 1,
                map_speed_low: 0,
                map_speed_high: 255,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
/// Calibration of one wheel.
pub struct WheelSettings {
    /// Wheel identifier on the wire.
    pub id: u8,
    /// Speed percentage used when a player gives none or an invalid one.
    pub default_speed: i32,
    /// Factor applied after mapping.
    pub multiplier: i32,
    /// Hardware value for 0%.
    pub map_speed_low: i32,
    /// Hardware value for 100%.
    pub map_speed_high: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Ball release and shot resolution.
pub struct ShotSettings {
    /// How long the release gate stays open.
    pub release_duration_ms: u32,
    /// Delay after the ball is detected before closing the gate.
    pub release_wait_ms: u32,
    /// Unresolved shots are treated as returned after this long.
    pub escape_timeout_ms: u64,
    /// Require the flap-set signal in addition to the ball return.
    pub require_flap_set: bool,
}

impl Default for ShotSettings {
    fn default() -> Self {
        Self {
            release_duration_ms: 200,
            release_wait_ms: 500,
            escape_timeout_ms: 15_000,
            require_flap_set: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Claw crane timings.
pub struct ClawSettings {
    /// Duration of one gantry movement command.
    pub movement_duration_ms: i32,
    /// Delay before the reduced firmware is assumed back over the center.
    pub centering_delay_ms: u64,
    /// Failsafe timers applied on every connect.
    pub failsafes: Vec<FailsafeSetting>,
}

impl Default for ClawSettings {
    fn default() -> Self {
        Self {
            movement_duration_ms: 200,
            centering_delay_ms: 15_000,
            failsafes: vec![
                FailsafeSetting {
                    kind: FailsafeKind::Motor,
                    timeout_ms: 30_000,
                },
                FailsafeSetting {
                    kind: FailsafeKind::ClawOpened,
                    timeout_ms: 8_000,
                },
                FailsafeSetting {
                    kind: FailsafeKind::Belt,
                    timeout_ms: 4_000,
                },
                FailsafeSetting {
                    kind: FailsafeKind::Flipper,
                    timeout_ms: 3_000,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
/// One firmware failsafe timer.
pub struct FailsafeSetting {
    /// Timer being set.
    pub kind: FailsafeKind,
    /// Timeout in milliseconds.
    pub timeout_ms: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Queue and turn rules.
pub struct TurnSettings {
    /// Seconds a new player has to send a first command.
    pub no_command_grace_secs: u64,
    /// Length of a full turn in seconds.
    pub turn_duration_secs: u64,
    /// Shots allowed per turn.
    pub balls_per_turn: u32,
    /// Maximum queued players, `0` for unlimited.
    pub max_queue_size: usize,
    /// Longest accepted command chain.
    pub max_commands_per_line: usize,
    /// Single commands sent before suggesting chains.
    pub single_command_hint_after: u32,
    /// Prefix marking chat commands such as `play`.
    pub command_prefix: String,
    /// Channel chat replies are sent to.
    pub chat_channel: String,
}

impl TurnSettings {
    /// Grace period as a [`Duration`].
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.no_command_grace_secs)
    }

    /// Full turn as a [`Duration`].
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.turn_duration_secs)
    }
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            no_command_grace_secs: 20,
            turn_duration_secs: 90,
            balls_per_turn: 3,
            max_queue_size: 0,
            max_commands_per_line: 10,
            single_command_hint_after: 10,
            command_prefix: "!".into(),
            chat_channel: "arcade".into(),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
