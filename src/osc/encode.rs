use chrono::TimeZone;
use rosc::{OscBundle, OscMessage, OscPacket, OscTime, OscType};

use crate::pose::{LandmarkSchema, Person};

/// OSC "execute immediately" time tag.
const IMMEDIATELY: OscTime = OscTime {
    seconds: 0,
    fractional: 1,
};

/// Per-frame facts the encoder needs alongside the detections.
#[derive(Debug, Clone, Copy)]
pub struct FrameMeta {
    pub frame_count: u64,
    /// Wall clock, unix seconds.
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
}

/// Whether this frame carries the ~1 Hz periodic metadata packet.
pub fn is_periodic_tick(frame_count: u64, fps_limit: u32) -> bool {
    fps_limit > 0 && frame_count % fps_limit as u64 == 0
}

/// Bundle mode: one packet per frame. Per-frame metadata is unconditional;
/// landmarks are addressed by (person_id, landmark_index), plus one bbox
/// message per person for detectors that produce boxes.
pub fn frame_bundle(meta: &FrameMeta, persons: &[Person]) -> OscPacket {
    let mut content = vec![
        OscPacket::Message(OscMessage {
            addr: "/pose/frame_count".to_string(),
            args: vec![OscType::Int(meta.frame_count as i32)],
        }),
        OscPacket::Message(OscMessage {
            addr: "/pose/num_persons".to_string(),
            args: vec![OscType::Int(persons.len() as i32)],
        }),
        // Unix seconds do not fit an OSC f32 with usable precision
        OscPacket::Message(OscMessage {
            addr: "/pose/timestamp".to_string(),
            args: vec![OscType::Double(meta.timestamp)],
        }),
    ];

    for person in persons {
        for (landmark_id, lm) in person.landmarks.iter().enumerate() {
            content.push(OscPacket::Message(OscMessage {
                addr: format!("/pose/p{}/{}", person.person_id, landmark_id),
                args: vec![
                    OscType::Float(lm.x),
                    OscType::Float(lm.y),
                    OscType::Float(lm.z),
                ],
            }));
        }
        if let Some(bbox) = &person.bbox {
            content.push(OscPacket::Message(OscMessage {
                addr: format!("/pose/p{}/bbox", person.person_id),
                args: vec![
                    OscType::Float(bbox.center_x),
                    OscType::Float(bbox.center_y),
                    OscType::Float(bbox.width),
                    OscType::Float(bbox.height),
                ],
            }));
        }
    }

    OscPacket::Bundle(OscBundle {
        timetag: IMMEDIATELY,
        content,
    })
}

/// Periodic (~1 Hz) metadata packet: stream geometry, model name and the
/// ordered landmark name table.
pub fn periodic_bundle(meta: &FrameMeta, model_name: &str, schema: LandmarkSchema) -> OscPacket {
    let aspect_ratio = if meta.height > 0 {
        meta.width as f32 / meta.height as f32
    } else {
        0.0
    };

    let content = vec![
        OscPacket::Message(OscMessage {
            addr: "/pose/timestamp_str".to_string(),
            args: vec![OscType::String(timestamp_string(meta.timestamp))],
        }),
        OscPacket::Message(OscMessage {
            addr: "/pose/image_width".to_string(),
            args: vec![OscType::Int(meta.width as i32)],
        }),
        OscPacket::Message(OscMessage {
            addr: "/pose/image_height".to_string(),
            args: vec![OscType::Int(meta.height as i32)],
        }),
        OscPacket::Message(OscMessage {
            addr: "/pose/aspect_ratio".to_string(),
            args: vec![OscType::Float(aspect_ratio)],
        }),
        OscPacket::Message(OscMessage {
            addr: "/pose/model_name".to_string(),
            args: vec![OscType::String(model_name.to_string())],
        }),
        OscPacket::Message(OscMessage {
            addr: "/pose/landmark_names".to_string(),
            args: schema
                .names()
                .iter()
                .map(|name| OscType::String((*name).to_string()))
                .collect(),
        }),
    ];

    OscPacket::Bundle(OscBundle {
        timetag: IMMEDIATELY,
        content,
    })
}

/// Legacy mode: individual messages, single person. Frame metadata goes out
/// every frame; landmark messages (addressed by name) and the trailing
/// /numLandmarks only when at least one person was detected. Persons beyond
/// the first are dropped.
pub fn legacy_messages(
    meta: &FrameMeta,
    persons: &[Person],
    schema: LandmarkSchema,
) -> Vec<OscMessage> {
    let mut messages = vec![
        OscMessage {
            addr: "/framecount".to_string(),
            args: vec![OscType::Int(meta.frame_count as i32)],
        },
        OscMessage {
            addr: "/image-width".to_string(),
            args: vec![OscType::Int(meta.width as i32)],
        },
        OscMessage {
            addr: "/image-height".to_string(),
            args: vec![OscType::Int(meta.height as i32)],
        },
    ];

    if let Some(person) = persons.first() {
        for (landmark_id, lm) in person.landmarks.iter().enumerate() {
            let name = schema.name(landmark_id).unwrap_or("Unknown");
            messages.push(OscMessage {
                addr: format!("/p1/{}", name),
                args: vec![
                    OscType::Float(lm.x),
                    OscType::Float(lm.y),
                    OscType::Float(lm.z),
                ],
            });
        }
        messages.push(OscMessage {
            addr: "/numLandmarks".to_string(),
            args: vec![OscType::Int(person.landmarks.len() as i32)],
        });
    }

    messages
}

/// Format unix seconds as "YYYY.MM.DD.HH.MM.SS.ms" in local time.
pub fn timestamp_string(unix_seconds: f64) -> String {
    let secs = unix_seconds.trunc() as i64;
    let millis = ((unix_seconds.fract() * 1000.0).round() as u32).min(999);
    match chrono::Local.timestamp_opt(secs, millis * 1_000_000) {
        chrono::LocalResult::Single(dt) => dt.format("%Y.%m.%d.%H.%M.%S.%3f").to_string(),
        _ => String::new(),
    }
}
