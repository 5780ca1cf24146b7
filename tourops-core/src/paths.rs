use std::fmt;

use crate::{CoreError, CoreResult};

const FORBIDDEN: &[char] = &['.', '#', '$', '[', ']', '*', '?', '/'];

/// A validated `/`-separated key path into the realtime store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let segments: Vec<String> = raw
            .trim_matches('/')
            .split('/')
            .map(str::to_string)
            .collect();
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self { segments })
    }

    pub fn from_segments<I, S>(segments: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(CoreError::ValidationError("store path cannot be empty".into()));
        }
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self { segments })
    }

    pub fn child(&self, segment: &str) -> CoreResult<Self> {
        validate_segment(segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn last(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// This path and every ancestor, shortest first.
    pub fn lineage(&self) -> Vec<StorePath> {
        (1..=self.segments.len())
            .map(|len| StorePath {
                segments: self.segments[..len].to_vec(),
            })
            .collect()
    }

    pub fn is_ancestor_or_self_of(&self, other: &StorePath) -> bool {
        other.segments.len() >= self.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// True when a write at `other` can change the value observed at `self`.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.is_ancestor_or_self_of(other) || other.is_ancestor_or_self_of(self)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Check a single key segment (tour code, booking reference, user id, field name).
pub fn validate_segment(segment: &str) -> CoreResult<()> {
    if segment.trim().is_empty() {
        return Err(CoreError::ValidationError("path segment cannot be empty".into()));
    }
    if let Some(bad) = segment
        .chars()
        .find(|c| FORBIDDEN.contains(c) || c.is_control())
    {
        return Err(CoreError::ValidationError(format!(
            "path segment '{}' contains forbidden character {:?}",
            segment, bad
        )));
    }
    Ok(())
}

pub fn tour(tour_id: &str) -> CoreResult<StorePath> {
    StorePath::from_segments(["tours", tour_id])
}

pub fn tour_bookings(tour_id: &str) -> CoreResult<StorePath> {
    StorePath::from_segments(["bookings", tour_id])
}

pub fn booking(tour_id: &str, booking_ref: &str) -> CoreResult<StorePath> {
    StorePath::from_segments(["bookings", tour_id, booking_ref])
}

pub fn tour_manifest(tour_id: &str) -> CoreResult<StorePath> {
    StorePath::from_segments(["tour_manifests", tour_id])
}

pub fn manifest_entry(tour_id: &str, booking_ref: &str) -> CoreResult<StorePath> {
    StorePath::from_segments(["tour_manifests", tour_id, booking_ref])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let path = StorePath::parse("/tours/T100/participants/").unwrap();
        assert_eq!(path.segments().len(), 3);
        assert_eq!(path.to_string(), "tours/T100/participants");
        assert_eq!(path.last(), "participants");
    }

    #[test]
    fn test_rejects_forbidden_segments() {
        assert!(StorePath::parse("tours//x").is_err());
        assert!(booking("T1", "BK.1").is_err());
        assert!(booking("T1", "BK*").is_err());
        assert!(manifest_entry("", "BK1").is_err());
        assert!(booking("T1", "BK-1_a").is_ok());
    }

    #[test]
    fn test_lineage_and_overlap() {
        let entry = manifest_entry("T1", "B1").unwrap();
        let lineage: Vec<String> = entry.lineage().iter().map(|p| p.to_string()).collect();
        assert_eq!(lineage, vec!["tour_manifests", "tour_manifests/T1", "tour_manifests/T1/B1"]);

        let tour_level = tour_manifest("T1").unwrap();
        assert!(tour_level.overlaps(&entry));
        assert!(entry.overlaps(&tour_level));
        assert!(!entry.overlaps(&manifest_entry("T1", "B2").unwrap()));
        assert!(!tour_level.overlaps(&tour_manifest("T10").unwrap()));
    }
}
