//! Line-based event script.
//!
//! ```text
//! on   <channel> <key> <velocity>
//! off  <channel> <key>
//! cc   <channel> <controller> <value>
//! pc   <channel> <program>
//! bend <channel> <value>
//! tick [count]
//! ```
//!
//! Channels are part indices (0..=7 melodic, 8 rhythm). `#` starts a comment.

use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use la32_voices::SynthMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    Message(SynthMessage),
    Tick(u32),
}

/// Parse a whole script. Commands are paired with their 1-based line number.
pub fn parse(source: &str) -> Result<Vec<(usize, Command)>> {
    let mut commands = Vec::new();
    for (index, line) in source.lines().enumerate() {
        let line_no = index + 1;
        if let Some(command) = parse_line(line).wrap_err_with(|| format!("line {line_no}"))? {
            commands.push((line_no, command));
        }
    }
    Ok(commands)
}

fn parse_line(line: &str) -> Result<Option<Command>> {
    let line = line.split('#').next().unwrap_or("").trim();
    let mut words = line.split_whitespace();
    let Some(op) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let command = match (op, args.as_slice()) {
        ("on", [channel, key, velocity]) => Command::NoteOn {
            channel: number(channel)?,
            key: number(key)?,
            velocity: number(velocity)?,
        },
        ("off", [channel, key]) => Command::Message(SynthMessage::NoteOff {
            channel: number(channel)?,
            key: number(key)?,
        }),
        ("cc", [channel, controller, value]) => Command::Message(SynthMessage::ControlChange {
            channel: number(channel)?,
            controller: number(controller)?,
            value: number(value)?,
        }),
        ("pc", [channel, program]) => Command::Message(SynthMessage::ProgramChange {
            channel: number(channel)?,
            program: number(program)?,
        }),
        ("bend", [channel, value]) => Command::Message(SynthMessage::PitchBend {
            channel: number(channel)?,
            value: number(value)?,
        }),
        ("tick", []) => Command::Tick(1),
        ("tick", [count]) => Command::Tick(number(count)?),
        ("on" | "off" | "cc" | "pc" | "bend" | "tick", _) => {
            bail!("wrong number of arguments for {op:?}")
        }
        _ => bail!("unknown command {op:?}"),
    };
    Ok(Some(command))
}

fn number<T: std::str::FromStr>(word: &str) -> Result<T> {
    word.parse().map_err(|_| eyre!("{word:?} is not a valid number here"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_and_skips_comments() {
        let script = "# warm up\non 0 60 100\n\ncc 0 64 127 # pedal\ntick\ntick 4\n";
        let commands = parse(script).unwrap();
        assert_eq!(
            commands,
            [
                (
                    2,
                    Command::NoteOn {
                        channel: 0,
                        key: 60,
                        velocity: 100
                    }
                ),
                (
                    4,
                    Command::Message(SynthMessage::ControlChange {
                        channel: 0,
                        controller: 64,
                        value: 127
                    })
                ),
                (5, Command::Tick(1)),
                (6, Command::Tick(4)),
            ]
        );
    }

    #[test]
    fn reports_the_failing_line() {
        let err = parse("on 0 60 100\noff 0\n").unwrap_err();
        assert_eq!(err.to_string(), "line 2");

        assert!(parse("on 0 300 100").is_err());
        assert!(parse("strum 0").is_err());
    }
}
