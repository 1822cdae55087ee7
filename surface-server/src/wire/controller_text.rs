//! Controller channel's newline-terminated ASCII grammar (spec §6):
//! `AC_AC`, `AC_UA:...`, `MC_CA`/`MC_CB`/`MC_MP`, `MC_OD:<oid>`, and the
//! outbound `ME_OD`/`ME_FD`/`ME_RA`/`ME_RB`/`ME_BR`/`ME_MC`/`MR_*`/`AH_*`
//! messages.

use crate::types::{AreaId, Detection, EventType, ObjectClass};

use super::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerCommand {
    ReadAuth,
    WriteAuth([u8; 8]),
    SubscribeCctvA,
    SubscribeCctvB,
    MapView,
    ObjectDetail(u64),
}

/// Parses one line (without the trailing newline) of the controller
/// grammar. Malformed lines and unknown commands are both reported as
/// `Error` so the caller can reply with the channel's error form.
pub fn parse_command(line: &str) -> Result<ControllerCommand, Error> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (head, rest) = line.split_once(':').unwrap_or((line, ""));

    match head {
        "AC_AC" => Ok(ControllerCommand::ReadAuth),
        "AC_UA" => parse_write_auth(rest),
        "MC_CA" => Ok(ControllerCommand::SubscribeCctvA),
        "MC_CB" => Ok(ControllerCommand::SubscribeCctvB),
        "MC_MP" => Ok(ControllerCommand::MapView),
        "MC_OD" => rest
            .parse::<u64>()
            .map(ControllerCommand::ObjectDetail)
            .map_err(|_| Error::MalformedLine(line.to_string())),
        other => Err(Error::UnknownCommand(other.to_string())),
    }
}

fn parse_write_auth(rest: &str) -> Result<ControllerCommand, Error> {
    let parts: Vec<&str> = rest.split(',').collect();
    if parts.len() != 8 {
        return Err(Error::MalformedLine(format!("AC_UA arity {} != 8", parts.len())));
    }

    let mut levels = [0u8; 8];
    for (slot, part) in levels.iter_mut().zip(parts.iter()) {
        let v: u8 = part.parse().map_err(|_| Error::MalformedLine(rest.to_string()))?;
        if !(1..=3).contains(&v) {
            return Err(Error::MalformedLine(format!("AC_UA level {v} out of range")));
        }
        *slot = v;
    }

    Ok(ControllerCommand::WriteAuth(levels))
}

#[must_use]
pub fn read_auth_ok(levels: &[u8; 8]) -> String {
    let joined = levels.iter().map(ToString::to_string).collect::<Vec<_>>().join(",");
    format!("AH_AC:{joined}\n")
}

#[must_use]
pub fn write_auth_ok() -> String {
    "AH_UA:OK\n".to_string()
}

#[must_use]
pub fn write_auth_error() -> String {
    "AH_UA:ERROR\n".to_string()
}

#[must_use]
pub fn subscribe_ok(which: ControllerCommand) -> String {
    match which {
        ControllerCommand::SubscribeCctvA => "MR_CA:OK\n".to_string(),
        ControllerCommand::SubscribeCctvB => "MR_CB:OK\n".to_string(),
        ControllerCommand::MapView => "MR_MP:OK\n".to_string(),
        _ => String::new(),
    }
}

/// Maps an area-id (1..=8) to its `ME_R<letter>` wire tag. Spec §4.4 gives
/// only the `ME_RA`/`ME_RB` examples (§8 scenario 1 confirms area-id 1,
/// TWY_A, fires `ME_RA`); this generalizes the same "Rth letter of the
/// alphabet, one per area-id" pattern across all 8 zones rather than
/// inventing a second, undocumented tag scheme (DESIGN.md records this
/// decision).
#[must_use]
pub fn zone_status(area_id: AreaId, hazard: bool) -> String {
    let letter = (b'A' + area_id.saturating_sub(1)) as char;
    format!("ME_R{letter}:{}\n", u8::from(hazard))
}

/// Builds one `ME_OD` line from an already access-filtered batch. Per
/// spec §4.6: `ME_OD:` then semicolon-joined
/// `object_id,CLASS,map_x,map_y,AREA_NAME[,rescue_level]` entries.
#[must_use]
pub fn object_detected_line(detections: &[Detection], area_name: impl Fn(AreaId) -> String) -> String {
    let entries: Vec<String> = detections
        .iter()
        .map(|d| {
            let (mx, my) = d.map_xy_wire();
            let area = d.area_id.map_or_else(|| "UNKNOWN".to_string(), &area_name);
            match (d.class, d.rescue_level) {
                (ObjectClass::Person, Some(level)) => {
                    format!("{},{},{mx},{my},{area},{level}", d.object_id, d.class)
                }
                _ => format!("{},{},{mx},{my},{area}", d.object_id, d.class),
            }
        })
        .collect();

    format!("ME_OD:{}\n", entries.join(";"))
}

/// Builds the `ME_FD` textual header (everything up to, but not
/// including, the raw image bytes that immediately follow it on the
/// wire). Caller is responsible for writing `header + "," + image_bytes`.
#[must_use]
pub fn first_detection_header(
    detection: &Detection,
    event_type: EventType,
    area_name: &str,
    iso8601_utc: &str,
    image_size: usize,
) -> String {
    let (mx, my) = detection.map_xy_wire();
    match (detection.class, detection.rescue_level) {
        (ObjectClass::Person, Some(level)) => format!(
            "{},{},{},{mx},{my},{area_name},{iso8601_utc},{level},{image_size}",
            event_type.as_u8(),
            detection.object_id,
            detection.class,
        ),
        _ => format!(
            "{},{},{},{mx},{my},{area_name},{iso8601_utc},{image_size}",
            event_type.as_u8(),
            detection.object_id,
            detection.class,
        ),
    }
}

#[must_use]
pub fn bird_risk(level: u8) -> String {
    format!("ME_BR:{level}\n")
}

#[must_use]
pub fn map_calibrated() -> String {
    "ME_MC\n".to_string()
}

#[must_use]
pub fn object_detail_ok(
    object_id: u64,
    class: ObjectClass,
    area_name: &str,
    iso8601_utc: &str,
    image_size: usize,
) -> String {
    format!("MR_OD:OK,{object_id},{class},{area_name},{iso8601_utc},{image_size}$$")
}

#[must_use]
pub fn object_detail_err(code: &str) -> String {
    format!("MR_OD:ERR,{code}\n")
}
