//! Frame-range notation as the scheduler expects it (eg. "1-10", "1-10x2",
//! "1-3,5,9-11").

use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Empty frame list")]
    Empty,
    #[error("Bad frame token \"{0}\"")]
    BadToken(String),
}

/// Compact a frame list into range notation.
///
/// The input is deduplicated and sorted; a uniform step collapses to a
/// single range token, otherwise contiguous runs are hyphenated and
/// singletons comma-joined.
pub fn format_frames(frames: &[i64]) -> Result<String, FrameError> {
    let frames: Vec<i64> = frames
        .iter()
        .copied()
        .collect::<BTreeSet<i64>>()
        .into_iter()
        .collect();
    let (first, rest) = frames.split_first().ok_or(FrameError::Empty)?;
    if rest.is_empty() {
        return Ok(first.to_string());
    }

    // Uniform step collapses to one token
    let steps: BTreeSet<i64> = frames.windows(2).map(|w| w[1] - w[0]).collect();
    if steps.len() == 1 {
        let step = *steps.iter().next().expect("non-empty");
        let mut token = format!("{first}-{}", frames[frames.len() - 1]);
        if step != 1 {
            token.push_str(&format!("x{step}"));
        }
        return Ok(token);
    }

    // Mixed runs
    let mut tokens = Vec::new();
    let mut start = *first;
    let mut prev = *first;
    for &frame in rest {
        if frame != prev + 1 {
            tokens.push(run_token(start, prev));
            start = frame;
        }
        prev = frame;
    }
    tokens.push(run_token(start, prev));
    Ok(tokens.join(","))
}

fn run_token(start: i64, end: i64) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

/// Expand range notation back into a frame list.
pub fn parse_frames(spec: &str) -> Result<Vec<i64>, FrameError> {
    let mut frames = BTreeSet::new();
    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            return Err(FrameError::BadToken(token.to_string()));
        }
        frames.extend(parse_token(token)?);
    }
    if frames.is_empty() {
        return Err(FrameError::Empty);
    }
    Ok(frames.into_iter().collect())
}

fn parse_token(token: &str) -> Result<Vec<i64>, FrameError> {
    let bad = || FrameError::BadToken(token.to_string());

    // Split off a step suffix (eg. "1-10x2")
    let (range, step) = match token.rsplit_once('x') {
        Some((range, step)) => (range, step.parse::<i64>().map_err(|_| bad())?),
        None => (token, 1),
    };
    if step < 1 {
        return Err(bad());
    }

    // Split the range on its separating hyphen (not a leading minus sign)
    let sep = range
        .char_indices()
        .skip(1)
        .find(|&(idx, c)| c == '-' && !range[..idx].ends_with('-'))
        .map(|(idx, _)| idx);
    let (start, end) = match sep {
        Some(idx) => {
            let start = range[..idx].parse::<i64>().map_err(|_| bad())?;
            let end = range[idx + 1..].parse::<i64>().map_err(|_| bad())?;
            (start, end)
        }
        None => {
            let frame = range.parse::<i64>().map_err(|_| bad())?;
            (frame, frame)
        }
    };
    if end < start {
        return Err(bad());
    }
    Ok((start..=end).step_by(step as usize).collect())
}

#[cfg(test)]
mod frames_test {
    use super::*;

    #[test]
    fn contiguous_range_compacts() {
        let frames: Vec<i64> = (1..=10).collect();
        assert_eq!(format_frames(&frames).unwrap(), "1-10");
    }

    #[test]
    fn single_frame() {
        assert_eq!(format_frames(&[1]).unwrap(), "1");
    }

    #[test]
    fn uniform_step() {
        assert_eq!(format_frames(&[1, 3, 5, 7]).unwrap(), "1-7x2");
    }

    #[test]
    fn mixed_runs_and_singletons() {
        assert_eq!(format_frames(&[1, 2, 3, 5, 9, 10, 11]).unwrap(), "1-3,5,9-11");
        assert_eq!(format_frames(&[4, 1, 8]).unwrap(), "1,4,8");
    }

    #[test]
    fn round_trips_reproduce_frame_set() {
        for frames in [
            vec![1],
            (1..=10).collect::<Vec<i64>>(),
            vec![1, 4, 8],
            vec![1, 2, 3, 5, 9, 10, 11],
            vec![-3, -2, -1, 0, 5],
        ] {
            let spec = format_frames(&frames).unwrap();
            assert_eq!(parse_frames(&spec).unwrap(), frames, "spec {spec}");
        }
    }

    #[test]
    fn bad_tokens_rejected() {
        assert!(parse_frames("").is_err());
        assert!(parse_frames("1-").is_err());
        assert!(parse_frames("ten").is_err());
        assert!(parse_frames("10-1").is_err());
        assert!(parse_frames("1-10x0").is_err());
    }

    #[test]
    fn negative_frames_parse() {
        assert_eq!(parse_frames("-3--1").unwrap(), vec![-3, -2, -1]);
    }
}
