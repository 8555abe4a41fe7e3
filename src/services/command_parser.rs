//! Turns chat text into queued machine commands.
//!
//! Short messages are single commands. Longer ones are chains of short commands, optionally
//! carrying a wheel fragment such as `wb 80`.

use std::sync::atomic::{AtomicI32, Ordering};

use tracing::debug;

use crate::{
    config::{AppConfig, SteppersConfig, WheelSettings, WheelsConfig},
    error::CommandError,
    protocol::{Axis, MachineKind},
    scheduler::{CommandKind, QueuedCommand},
};

const SKEEBALL_CHAINABLE: &[&str] = &["r", "l", "s", "tr", "tl"];
const CLAW_CHAINABLE: &[&str] = &["f", "b", "l", "r", "d"];
/// Wheels may only go this slow while the other wheel stays fast.
const SLOW_WHEEL_THRESHOLD: i32 = 70;
const FAST_WHEEL_THRESHOLD: i32 = 75;
/// Chained wheel values outside 0..=100 are replaced with this.
const CHAIN_WHEEL_FALLBACK: i32 = 50;

/// Launch wheel selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wheel {
    /// Left wheel (`wl`).
    Left,
    /// Right wheel (`wr`).
    Right,
}

impl Wheel {
    fn other(self) -> Self {
        match self {
            Wheel::Left => Wheel::Right,
            Wheel::Right => Wheel::Left,
        }
    }
}

/// A chained message split into its parts, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandChain {
    /// Wheel commands applied before the chain (`wl 80`, `wr 80`).
    pub wheels: Vec<String>,
    /// Single commands to run one after another.
    pub commands: Vec<String>,
}

/// Parser bound to one machine's vocabulary and calibration.
///
/// Remembers the last requested speed of each wheel for the slow-wheel rule.
pub struct CommandParser {
    kind: MachineKind,
    steppers: SteppersConfig,
    wheels: WheelsConfig,
    claw_move_ms: i32,
    max_chain: usize,
    left_speed: AtomicI32,
    right_speed: AtomicI32,
}

impl CommandParser {
    /// Parser for the configured machine.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            kind: config.machine.kind,
            steppers: config.steppers.clone(),
            wheels: config.wheels.clone(),
            claw_move_ms: config.claw.movement_duration_ms,
            max_chain: config.turn.max_commands_per_line,
            left_speed: AtomicI32::new(config.wheels.left.default_speed),
            right_speed: AtomicI32::new(config.wheels.right.default_speed),
        }
    }

    /// Whether `text` is handled as one command rather than a chain.
    pub fn is_single(text: &str) -> bool {
        let text = text.trim();
        if text.chars().count() <= 2 {
            return true;
        }
        matches!(text.split_whitespace().next(), Some("mt" | "pt"))
    }

    /// Last requested speed percentage of `wheel`.
    pub fn wheel_speed(&self, wheel: Wheel) -> i32 {
        self.speed_slot(wheel).load(Ordering::SeqCst)
    }

    /// Parse one command. Unknown text yields `Ok(None)`.
    pub fn parse(&self, username: &str, text: &str) -> Result<Option<QueuedCommand>, CommandError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let Some(&command) = tokens.first() else {
            return Ok(None);
        };

        let parsed = if self.kind.is_claw() {
            self.parse_claw(command)
        } else {
            self.parse_skeeball(command, &tokens)?
        };

        Ok(parsed.map(|(kind, argument1, argument2)| {
            QueuedCommand::new(kind, argument1, argument2, username)
        }))
    }

    /// Split a chained message. Every token must be chainable and the chain must fit the limit.
    pub fn split_chain(&self, text: &str) -> Result<CommandChain, CommandError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let mut chain = CommandChain::default();
        let mut wheel_fragment: Option<(&str, i32)> = None;

        let mut index = 0;
        while index < tokens.len() {
            let token = tokens[index];
            let value = tokens.get(index + 1).and_then(|next| parse_digits(next));
            match (token, value) {
                ("wl" | "wr" | "wb", Some(value)) if !self.kind.is_claw() => {
                    let value = if (0..=100).contains(&value) {
                        value
                    } else {
                        CHAIN_WHEEL_FALLBACK
                    };
                    wheel_fragment = Some((token, value));
                    index += 2;
                }
                _ => {
                    if !self.chainable().contains(&token) {
                        return Err(CommandError::NotChainable {
                            token: token.to_string(),
                        });
                    }
                    chain.commands.push(token.to_string());
                    index += 1;
                }
            }
        }

        if chain.commands.len() > self.max_chain {
            return Err(CommandError::ChainTooLong {
                max: self.max_chain,
            });
        }

        match wheel_fragment {
            Some(("wb", value)) => {
                chain.wheels.push(format!("wr {value}"));
                chain.wheels.push(format!("wl {value}"));
            }
            Some((wheel, value)) => chain.wheels.push(format!("{wheel} {value}")),
            None => {}
        }

        debug!(?chain, "parsed command chain");
        Ok(chain)
    }

    fn parse_skeeball(
        &self,
        command: &str,
        tokens: &[&str],
    ) -> Result<Option<(CommandKind, i32, i32)>, CommandError> {
        let lr = self.steppers.get(Axis::LeftRight);
        let pan = self.steppers.get(Axis::Pan);

        let parsed = match command {
            "tl" => Some((CommandKind::TurnLeft, pan.move_steps_normal, 0)),
            "tr" => Some((CommandKind::TurnRight, pan.move_steps_normal, 0)),
            "r" => Some((CommandKind::MoveRight, lr.move_steps_normal, 0)),
            "rs" => Some((CommandKind::MoveRight, lr.move_steps_small, 0)),
            "l" => Some((CommandKind::MoveLeft, lr.move_steps_normal, 0)),
            "ls" => Some((CommandKind::MoveLeft, lr.move_steps_small, 0)),
            "mt" | "pt" => {
                let position = match tokens {
                    [_, value] => value.parse::<i32>().ok().filter(|value| *value >= 0),
                    _ => None,
                };
                let Some(position) = position else {
                    return Err(CommandError::InvalidPosition {
                        command: command.to_string(),
                    });
                };
                let kind = if command == "mt" {
                    CommandKind::MoveTo
                } else {
                    CommandKind::PanTo
                };
                Some((kind, position, 0))
            }
            "wl" | "wr" => match tokens {
                [_, value] => {
                    let wheel = if command == "wl" {
                        Wheel::Left
                    } else {
                        Wheel::Right
                    };
                    let (id, mapped) = self.wheel_command(wheel, value)?;
                    Some((CommandKind::WheelSpeed, i32::from(id), mapped))
                }
                _ => None,
            },
            "s" => Some((CommandKind::Shoot, 0, 0)),
            _ => None,
        };

        Ok(parsed)
    }

    fn parse_claw(&self, command: &str) -> Option<(CommandKind, i32, i32)> {
        let duration = self.claw_move_ms;
        match command {
            "f" => Some((CommandKind::MoveForward, duration, 0)),
            "b" => Some((CommandKind::MoveBackward, duration, 0)),
            "l" => Some((CommandKind::MoveLeft, duration, 0)),
            "r" => Some((CommandKind::MoveRight, duration, 0)),
            "d" => Some((CommandKind::Shoot, 0, 0)),
            _ => None,
        }
    }

    /// Apply the slow-wheel rule and map the percentage into the wheel's hardware range.
    fn wheel_command(&self, wheel: Wheel, value: &str) -> Result<(u8, i32), CommandError> {
        let requested = value.parse::<i32>().ok();
        if requested.unwrap_or(0) < SLOW_WHEEL_THRESHOLD
            && self.wheel_speed(wheel.other()) < FAST_WHEEL_THRESHOLD
        {
            return Err(CommandError::WheelsTooSlow);
        }

        let settings = self.wheel_settings(wheel);
        let speed = requested
            .filter(|speed| (0..=100).contains(speed))
            .unwrap_or(settings.default_speed);
        self.speed_slot(wheel).store(speed, Ordering::SeqCst);

        Ok((settings.id, map_speed(speed, settings)))
    }

    fn wheel_settings(&self, wheel: Wheel) -> &WheelSettings {
        match wheel {
            Wheel::Left => &self.wheels.left,
            Wheel::Right => &self.wheels.right,
        }
    }

    fn speed_slot(&self, wheel: Wheel) -> &AtomicI32 {
        match wheel {
            Wheel::Left => &self.left_speed,
            Wheel::Right => &self.right_speed,
        }
    }

    fn chainable(&self) -> &'static [&'static str] {
        if self.kind.is_claw() {
            CLAW_CHAINABLE
        } else {
            SKEEBALL_CHAINABLE
        }
    }
}

fn map_speed(speed: i32, settings: &WheelSettings) -> i32 {
    let span = settings.map_speed_high - settings.map_speed_low;
    (speed * span / 100 + settings.map_speed_low) * settings.multiplier
}

fn parse_digits(token: &str) -> Option<i32> {
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    // Absurdly long numbers are simply out of range.
    Some(token.parse::<i32>().unwrap_or(i32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser(kind: MachineKind) -> CommandParser {
        let mut config = AppConfig::default();
        config.machine.kind = kind;
        config.turn.max_commands_per_line = 4;
        CommandParser::from_config(&config)
    }

    fn kind_of(parser: &CommandParser, text: &str) -> Option<(CommandKind, i32, i32)> {
        parser
            .parse("ada", text)
            .unwrap()
            .map(|command| (command.kind, command.argument1, command.argument2))
    }

    #[test]
    fn skeeball_vocabulary_uses_stepper_sizes() {
        let parser = parser(MachineKind::Skeeball);
        assert_eq!(kind_of(&parser, "l"), Some((CommandKind::MoveLeft, 300, 0)));
        assert_eq!(kind_of(&parser, "rs"), Some((CommandKind::MoveRight, 100, 0)));
        assert_eq!(kind_of(&parser, "tl"), Some((CommandKind::TurnLeft, 40, 0)));
        assert_eq!(kind_of(&parser, "pt 900"), Some((CommandKind::PanTo, 900, 0)));
        assert_eq!(kind_of(&parser, "s"), Some((CommandKind::Shoot, 0, 0)));
        assert_eq!(kind_of(&parser, "hello"), None);
        assert_eq!(kind_of(&parser, "wl"), None);
    }

    #[test]
    fn malformed_positions_are_rejected() {
        let parser = parser(MachineKind::Skeeball);
        assert_eq!(
            parser.parse("ada", "mt abc").unwrap_err(),
            CommandError::InvalidPosition {
                command: "mt".into()
            }
        );
        assert!(parser.parse("ada", "pt").is_err());
        assert!(parser.parse("ada", "mt -1").is_err());
    }

    #[test]
    fn wheel_speed_maps_and_remembers() {
        let parser = parser(MachineKind::Skeeball);
        assert_eq!(
            kind_of(&parser, "wl 60"),
            Some((CommandKind::WheelSpeed, 1, 153))
        );
        assert_eq!(parser.wheel_speed(Wheel::Left), 60);

        assert_eq!(
            parser.parse("ada", "wr 50").unwrap_err(),
            CommandError::WheelsTooSlow
        );
        assert_eq!(
            parser.parse("ada", "wr 50").unwrap_err().to_string(),
            "Only one wheel is allowed under 75% speed."
        );
        assert_eq!(parser.wheel_speed(Wheel::Right), 85);

        assert_eq!(
            kind_of(&parser, "wr 250"),
            Some((CommandKind::WheelSpeed, 2, 216))
        );
        assert_eq!(parser.wheel_speed(Wheel::Right), 85);
    }

    #[test]
    fn claw_vocabulary_uses_movement_duration() {
        let parser = parser(MachineKind::Claw);
        assert_eq!(kind_of(&parser, "f"), Some((CommandKind::MoveForward, 200, 0)));
        assert_eq!(kind_of(&parser, "d"), Some((CommandKind::Shoot, 0, 0)));
        assert_eq!(kind_of(&parser, "s"), None);
        assert_eq!(kind_of(&parser, "tl"), None);
    }

    #[test]
    fn single_or_chain() {
        assert!(CommandParser::is_single("l"));
        assert!(CommandParser::is_single(" tr "));
        assert!(CommandParser::is_single("mt 1200"));
        assert!(!CommandParser::is_single("l l s"));
        assert!(!CommandParser::is_single("wl 80"));
    }

    #[test]
    fn chain_extracts_last_wheel_fragment() {
        let parser = parser(MachineKind::Skeeball);
        let chain = parser.split_chain("wl 80 l l wb 300 s").unwrap();
        assert_eq!(chain.wheels, vec!["wr 50", "wl 50"]);
        assert_eq!(chain.commands, vec!["l", "l", "s"]);

        let chain = parser.split_chain("wr 90").unwrap();
        assert_eq!(chain.wheels, vec!["wr 90"]);
        assert!(chain.commands.is_empty());
    }

    #[test]
    fn chain_rejects_unknown_tokens_and_long_chains() {
        let parser = parser(MachineKind::Skeeball);
        assert_eq!(
            parser.split_chain("l hello s").unwrap_err(),
            CommandError::NotChainable {
                token: "hello".into()
            }
        );
        assert_eq!(
            parser.split_chain("l l l l l").unwrap_err(),
            CommandError::ChainTooLong { max: 4 }
        );
        assert!(parser.split_chain("mt 100 l").is_err());
    }

    #[test]
    fn claw_chains_have_no_wheels() {
        let parser = parser(MachineKind::SimpleClaw);
        assert_eq!(
            parser.split_chain("f f l d").unwrap().commands,
            vec!["f", "f", "l", "d"]
        );
        assert!(parser.split_chain("wl 80 f").is_err());
    }
}
