//! The command dispatcher: one synchronous function from [`Request`] to the
//! response string, run on the render thread by the frame hook.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::host::Host;
use crate::protocol::Request;
use crate::value::{join_values, ScriptValue};

/// Dispatch one request against the host and produce its wire response.
///
/// A panic anywhere below is caught here: the script stack is force-reset
/// and a command-specific `…crash` response is returned, so nothing ever
/// unwinds into the host's render loop.
pub fn dispatch(host: &dyn Host, req: &Request) -> String {
    match panic::catch_unwind(AssertUnwindSafe(|| dispatch_inner(host, req))) {
        Ok(response) => response,
        Err(_) => {
            warn!(?req, "dispatch panicked; resetting script stack");
            host.reset_script_stack();
            crash_response(req)
        }
    }
}

fn dispatch_inner(host: &dyn Host, req: &Request) -> String {
    if req.needs_scripting() && !host.scripting_ready() {
        return not_ready_response(req);
    }

    match req {
        Request::Ping => "PONG".to_owned(),

        Request::ExecScript { code } => match host.run_script(code) {
            Ok(values) => format!("LUA_RESULT:{}", join_values(&values)),
            Err(e) => format!("LUA_RESULT:ERROR:{e}"),
        },

        Request::GetTimeMs => match host.run_script(b"return GetTime()") {
            Ok(values) => match values.first().and_then(ScriptValue::as_number) {
                Some(seconds) => format!("TIME:{}", to_millis(seconds)),
                None => "ERROR:GetTime result type invalid".to_owned(),
            },
            Err(e) => format!("ERROR:{e}"),
        },

        Request::GetCooldown { spell_id } => {
            let chunk = format!("return GetSpellCooldown({spell_id})");
            match host.run_script(chunk.as_bytes()) {
                Ok(values) => cooldown_response(&values),
                Err(e) => format!("CD_ERR:{e}"),
            }
        }

        Request::IsInRange { spell_id, unit_id } => in_range(host, *spell_id, unit_id),

        Request::GetSpellInfo { spell_id } => match host.spell_info(*spell_id) {
            Ok(info) => format!(
                "SPELLINFO:{}|{}|{:.0}|{:.1}|{:.1}|{}|{:.0}|{}",
                info.name,
                info.rank,
                info.cast_time_ms,
                info.min_range,
                info.max_range,
                info.icon,
                info.cost,
                info.power_type,
            ),
            Err(e) => format!("SPELLINFO_ERR:{e}"),
        },

        Request::CastSpell { spell_id, target_guid } => {
            debug!(spell_id, target_guid = %format_args!("{target_guid:#x}"), "cast request");
            match host.cast_spell(*spell_id, *target_guid) {
                Ok(result) => format!("CAST_RESULT:{spell_id},{result}"),
                Err(e) => format!("CAST_RESULT:ERROR:{e}"),
            }
        }

        Request::GetTargetGuid => match host.read_target_guid() {
            Ok(guid) => format!("TARGET_GUID:0x{guid:X}"),
            Err(e) => {
                warn!(%e, "target guid read failed");
                "ERROR:target guid unreadable".to_owned()
            }
        },

        Request::GetComboPoints => match host.read_combo_points() {
            Ok(points) if points > 5 => {
                // A stale anchor reads garbage; report zero rather than a
                // value the rotation engine would act on.
                warn!(points, "combo point byte out of range, clamping to 0");
                "CP:0".to_owned()
            }
            Ok(points) => format!("CP:{points}"),
            Err(e) => {
                warn!(%e, "combo point read failed");
                "CP:-99".to_owned()
            }
        },

        Request::IsBehindTarget { target_guid } => match host.facing_checks(*target_guid) {
            Ok(checks) => {
                let behind = !checks.target_sees_player && checks.player_sees_target;
                format!("[IS_BEHIND_TARGET_OK:{}]", behind as i32)
            }
            Err(e) => format!("[ERROR:{e}]"),
        },

        Request::Unknown { raw } => {
            warn!(raw, "unknown request");
            "ERROR:Unknown request".to_owned()
        }
    }
}

/// `GetSpellCooldown` must hand back three numbers: start seconds, duration
/// seconds, enabled flag.
fn cooldown_response(values: &[ScriptValue]) -> String {
    let nums: Vec<f64> = values.iter().take(3).filter_map(ScriptValue::as_number).collect();
    if nums.len() < 3 {
        return "ERROR:GetSpellCooldown result types invalid".to_owned();
    }
    format!(
        "CD:{},{},{}",
        to_millis(nums[0]),
        to_millis(nums[1]),
        (nums[2] != 0.0) as i32
    )
}

fn in_range(host: &dyn Host, spell_id: i32, unit_id: &str) -> String {
    // The range API wants the spell's name, not its id; resolve it through
    // the native spell-info call first.
    let name = match host.spell_info(spell_id) {
        Ok(info) if !info.name_missing() => info.name,
        _ => return "RANGE_ERR:GetSpellInfo failed".to_owned(),
    };

    let chunk = format!(
        "return IsSpellInRange(\"{}\", \"{}\")",
        escape_script_literal(&name),
        escape_script_literal(unit_id)
    );
    match host.run_script(chunk.as_bytes()) {
        Ok(values) => {
            let verdict = match values.first() {
                Some(ScriptValue::Number(n)) => *n as i64,
                Some(ScriptValue::Boolean(b)) => *b as i64,
                // nil means "unknown unit / not applicable" — treat as out
                // of range rather than failing the command.
                Some(ScriptValue::Nil) | None => 0,
                Some(_) => -1,
            };
            format!("IN_RANGE:{verdict}")
        }
        Err(e) => format!("RANGE_ERR:{e}"),
    }
}

/// Escape a value for interpolation into a double-quoted script literal.
fn escape_script_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out
}

/// Seconds-to-milliseconds with the truncation the controller expects.
#[inline]
fn to_millis(seconds: f64) -> i64 {
    (seconds * 1000.0) as i64
}

fn not_ready_response(req: &Request) -> String {
    match req {
        Request::ExecScript { .. } => "LUA_RESULT:ERROR:not initialized".to_owned(),
        Request::GetTimeMs => "ERROR:not initialized".to_owned(),
        Request::GetCooldown { .. } => "CD_ERR:not initialized".to_owned(),
        Request::IsInRange { .. } => "RANGE_ERR:not initialized".to_owned(),
        Request::GetSpellInfo { .. } => "SPELLINFO_ERR:not initialized".to_owned(),
        _ => "ERROR:not initialized".to_owned(),
    }
}

/// Last-resort texts for a panic that escapes `dispatch_inner` itself.
/// Host-side faults normally surface as typed errors (`ScriptError::Fault`,
/// `HostCallError::Crash`, `PositionError::AccessViolation`) and format
/// through their `Display` in the arms above; this table only backs the
/// outer boundary.
fn crash_response(req: &Request) -> String {
    match req {
        Request::ExecScript { .. } => "LUA_RESULT:ERROR:crash".to_owned(),
        Request::GetCooldown { .. } => "CD_ERR:crash".to_owned(),
        Request::IsInRange { .. } => "RANGE_ERR:crash".to_owned(),
        Request::GetSpellInfo { .. } => "SPELLINFO_ERR:crash".to_owned(),
        Request::CastSpell { .. } => "CAST_RESULT:ERROR:crash".to_owned(),
        Request::IsBehindTarget { .. } => "[ERROR:crash]".to_owned(),
        _ => "ERROR:crash".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_truncate_like_the_host() {
        assert_eq!(to_millis(0.0), 0);
        assert_eq!(to_millis(1.5), 1500);
        assert_eq!(to_millis(1234.567), 1234567);
        assert_eq!(to_millis(100.0), 100000);
    }

    #[test]
    fn escape_handles_quotes_and_backslashes() {
        assert_eq!(escape_script_literal("Sinister Strike"), "Sinister Strike");
        assert_eq!(escape_script_literal(r#"a"b"#), r#"a\"b"#);
        assert_eq!(escape_script_literal(r"a\b"), r"a\\b");
    }

    #[test]
    fn cooldown_rejects_non_numeric_slots() {
        let ok = [
            ScriptValue::Number(0.0),
            ScriptValue::Number(0.0),
            ScriptValue::Number(1.0),
        ];
        assert_eq!(cooldown_response(&ok), "CD:0,0,1");

        let bad = [
            ScriptValue::Number(0.0),
            ScriptValue::Text("1.5".into()),
            ScriptValue::Number(1.0),
        ];
        assert_eq!(cooldown_response(&bad), "ERROR:GetSpellCooldown result types invalid");

        let short = [ScriptValue::Number(0.0)];
        assert_eq!(cooldown_response(&short), "ERROR:GetSpellCooldown result types invalid");
    }
}
