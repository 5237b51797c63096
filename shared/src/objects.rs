//! Positional game-object records used by the object-sync sub-protocol.
//!
//! One object per line, whitespace separated:
//!
//! ```text
//! <guid> <id> <px> <py> <pz> <rx> <ry> <rz> <rw>
//! ```
//!
//! A list on the wire is a marker line, zero or more records, and a closing
//! [`END_OBJECT_LIST`](crate::END_OBJECT_LIST) line.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Number of whitespace separated fields in one record.
pub const RECORD_FIELDS: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ObjectParseError {
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("invalid guid `{0}`")]
    Guid(String),
    #[error("invalid id `{0}`")]
    Id(String),
    #[error("invalid number `{value}` in field {field}")]
    Number { field: usize, value: String },
}

/// A networked object with identity, position and rotation.
#[derive(Debug, Clone, PartialEq)]
pub struct GameObject {
    pub guid: Uuid,
    pub id: i32,
    pub position: Vec3,
    pub rotation: Quat,
}

impl GameObject {
    /// Creates an object at the origin with identity rotation and a fresh guid.
    pub fn new(id: i32) -> Self {
        Self {
            guid: Uuid::new_v4(),
            id,
            position: Vec3::default(),
            rotation: Quat::IDENTITY,
        }
    }

    pub fn with_position(mut self, x: f32, y: f32, z: f32) -> Self {
        self.position = Vec3 { x, y, z };
        self
    }

    pub fn with_rotation(mut self, x: f32, y: f32, z: f32, w: f32) -> Self {
        self.rotation = Quat { x, y, z, w };
        self
    }

    /// Renders the object as one record line, without a trailing newline.
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for GameObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {} {}",
            self.guid,
            self.id,
            self.position.x,
            self.position.y,
            self.position.z,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
            self.rotation.w
        )
    }
}

impl FromStr for GameObject {
    type Err = ObjectParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < RECORD_FIELDS {
            return Err(ObjectParseError::FieldCount {
                expected: RECORD_FIELDS,
                found: tokens.len(),
            });
        }

        let guid = Uuid::parse_str(tokens[0])
            .map_err(|_| ObjectParseError::Guid(tokens[0].to_string()))?;
        let id = tokens[1]
            .parse::<i32>()
            .map_err(|_| ObjectParseError::Id(tokens[1].to_string()))?;

        let mut numbers = [0.0f32; RECORD_FIELDS - 2];
        for (offset, slot) in numbers.iter_mut().enumerate() {
            let field = offset + 2;
            *slot = tokens[field]
                .parse::<f32>()
                .map_err(|_| ObjectParseError::Number {
                    field,
                    value: tokens[field].to_string(),
                })?;
        }

        Ok(Self {
            guid,
            id,
            position: Vec3 {
                x: numbers[0],
                y: numbers[1],
                z: numbers[2],
            },
            rotation: Quat {
                x: numbers[3],
                y: numbers[4],
                z: numbers[5],
                w: numbers[6],
            },
        })
    }
}

/// Result of parsing a block of record lines.
///
/// Malformed lines do not abort the parse; they are collected in `rejected`
/// alongside the line number they came from.
#[derive(Debug, Default)]
pub struct ObjectList {
    pub objects: Vec<GameObject>,
    pub rejected: Vec<(usize, ObjectParseError)>,
}

impl ObjectList {
    /// Parses every non-blank line of `payload`.
    pub fn parse(payload: &str) -> Self {
        Self::from_lines(payload.lines())
    }

    pub fn from_lines<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut list = ObjectList::default();
        for (index, line) in lines.into_iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<GameObject>() {
                Ok(object) => list.objects.push(object),
                Err(e) => list.rejected.push((index + 1, e)),
            }
        }
        list
    }

    /// Renders `objects` as a complete list block opened by `marker`.
    pub fn render(marker: &str, objects: &[GameObject]) -> Vec<String> {
        let mut lines = Vec::with_capacity(objects.len() + 2);
        lines.push(marker.to_string());
        lines.extend(objects.iter().map(GameObject::to_line));
        lines.push(crate::END_OBJECT_LIST.to_string());
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    const GUID: &str = "6f1c8d7e-2b1a-4c3d-9e8f-0a1b2c3d4e5f";

    #[test]
    fn test_parse_record() {
        let line = format!("{} 7 1.5 -2 3.25 0 0.7071 0 0.7071", GUID);
        let object: GameObject = line.parse().unwrap();

        assert_eq!(object.guid.to_string(), GUID);
        assert_eq!(object.id, 7);
        assert_approx_eq!(object.position.x, 1.5);
        assert_approx_eq!(object.position.y, -2.0);
        assert_approx_eq!(object.position.z, 3.25);
        assert_approx_eq!(object.rotation.y, 0.7071);
        assert_approx_eq!(object.rotation.w, 0.7071);
    }

    #[test]
    fn test_render_then_parse_keeps_fields() {
        let object = GameObject::new(42)
            .with_position(10.0, 0.5, -4.0)
            .with_rotation(0.0, 0.0, 0.0, 1.0);
        let parsed: GameObject = object.to_line().parse().unwrap();
        assert_eq!(parsed, object);
    }

    #[test]
    fn test_too_few_fields() {
        let err = "abc 1 2 3".parse::<GameObject>().unwrap_err();
        assert_eq!(
            err,
            ObjectParseError::FieldCount {
                expected: RECORD_FIELDS,
                found: 4
            }
        );
    }

    #[test]
    fn test_bad_guid_and_numbers() {
        let err = "not-a-guid 1 0 0 0 0 0 0 1".parse::<GameObject>().unwrap_err();
        assert!(matches!(err, ObjectParseError::Guid(_)));

        let line = format!("{} x 0 0 0 0 0 0 1", GUID);
        assert!(matches!(
            line.parse::<GameObject>(),
            Err(ObjectParseError::Id(_))
        ));

        let line = format!("{} 1 0 nan? 0 0 0 0 1", GUID);
        assert!(matches!(
            line.parse::<GameObject>(),
            Err(ObjectParseError::Number { field: 3, .. })
        ));
    }

    #[test]
    fn test_list_skips_bad_lines() {
        let payload = format!(
            "{g} 1 0 0 0 0 0 0 1\n\ngarbage\n{g} 2 1 1 1 0 0 0 1\n",
            g = GUID
        );
        let list = ObjectList::parse(&payload);

        assert_eq!(list.objects.len(), 2);
        assert_eq!(list.objects[1].id, 2);
        assert_eq!(list.rejected.len(), 1);
        assert_eq!(list.rejected[0].0, 3);
    }

    #[test]
    fn test_render_block() {
        let objects = vec![GameObject::new(1), GameObject::new(2)];
        let lines = ObjectList::render(crate::SERVER_OBJECT_LIST, &objects);

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], crate::SERVER_OBJECT_LIST);
        assert_eq!(lines[3], crate::END_OBJECT_LIST);

        let list = ObjectList::from_lines(lines[1..3].iter().map(String::as_str));
        assert_eq!(list.objects, objects);
    }
}
