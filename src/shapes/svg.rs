// SVG-path and circle mini-language parsing.
//
// Recognizes the path commands `M|L|H|V|Z` (uppercase absolute, lowercase
// relative — except `M`, which is always absolute because there is no
// cursor position before the first point of a sub-path) and a circle
// mini-language `circle x:<n> y:<n> r:<n>`. Every coordinate is a signed
// integer token; tokens are whitespace-separated.

use thiserror::Error;

use crate::primitives::point::Point;

pub const MAX_SVG_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SvgParseError {
    #[error("svg string exceeds {MAX_SVG_LEN} bytes")]
    TooLong,
    #[error("path must start with an M command")]
    MissingMoveStart,
    #[error("unrecognized command token {0:?}")]
    UnknownCommand(String),
    #[error("malformed numeric argument {0:?}")]
    BadNumber(String),
    #[error("command {0} is missing its argument(s)")]
    MissingArgument(String),
    #[error("empty svg string")]
    Empty,
}

/// A parsed path: an ordered run of points, each carrying whether it opens
/// a new sub-path (`moved`). Consecutive points that do not straddle a
/// `moved` boundary describe a line segment.
pub fn parse_path(svg: &str) -> Result<Vec<Point>, SvgParseError> {
    if svg.len() > MAX_SVG_LEN {
        return Err(SvgParseError::TooLong);
    }
    let tokens: Vec<&str> = svg.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(SvgParseError::Empty);
    }

    let mut points: Vec<Point> = Vec::new();
    let mut i = 0usize;
    let mut started = false;

    while i < tokens.len() {
        let token = tokens[i];
        let upper = token.to_ascii_uppercase();
        let relative = token != upper && upper != "M";

        if !started && upper != "M" {
            return Err(SvgParseError::MissingMoveStart);
        }

        match upper.as_str() {
            "M" => {
                let (x, y) = take_two(&tokens, i)?;
                points.push(Point::new(x, y, true));
                started = true;
                i += 3;
            }
            "L" => {
                let (dx, dy) = take_two(&tokens, i)?;
                let prev = *points.last().ok_or(SvgParseError::MissingMoveStart)?;
                let (x, y) = if relative { (prev.x + dx, prev.y + dy) } else { (dx, dy) };
                points.push(Point::new(x, y, false));
                i += 3;
            }
            "H" => {
                let x_arg = take_one(&tokens, i)?;
                let prev = *points.last().ok_or(SvgParseError::MissingMoveStart)?;
                let x = if relative { prev.x + x_arg } else { x_arg };
                points.push(Point::new(x, prev.y, false));
                i += 2;
            }
            "V" => {
                let y_arg = take_one(&tokens, i)?;
                let prev = *points.last().ok_or(SvgParseError::MissingMoveStart)?;
                let y = if relative { prev.y + y_arg } else { y_arg };
                points.push(Point::new(prev.x, y, false));
                i += 2;
            }
            "Z" => {
                let sub_start = points
                    .iter()
                    .rposition(|p| p.moved)
                    .ok_or(SvgParseError::MissingMoveStart)?;
                let start = points[sub_start];
                points.push(Point::new(start.x, start.y, false));
                i += 1;
            }
            _ => return Err(SvgParseError::UnknownCommand(token.to_string())),
        }
    }

    Ok(points)
}

fn take_one(tokens: &[&str], i: usize) -> Result<i64, SvgParseError> {
    let raw = tokens
        .get(i + 1)
        .ok_or_else(|| SvgParseError::MissingArgument(tokens[i].to_string()))?;
    raw.parse::<i64>()
        .map_err(|_| SvgParseError::BadNumber((*raw).to_string()))
}

fn take_two(tokens: &[&str], i: usize) -> Result<(i64, i64), SvgParseError> {
    let raw_x = tokens
        .get(i + 1)
        .ok_or_else(|| SvgParseError::MissingArgument(tokens[i].to_string()))?;
    let raw_y = tokens
        .get(i + 2)
        .ok_or_else(|| SvgParseError::MissingArgument(tokens[i].to_string()))?;
    let x = raw_x
        .parse::<i64>()
        .map_err(|_| SvgParseError::BadNumber((*raw_x).to_string()))?;
    let y = raw_y
        .parse::<i64>()
        .map_err(|_| SvgParseError::BadNumber((*raw_y).to_string()))?;
    Ok((x, y))
}

/// Parses the `circle x:<n> y:<n> r:<n>` mini-language.
pub fn parse_circle(svg: &str) -> Result<(i64, i64, u32), SvgParseError> {
    if svg.len() > MAX_SVG_LEN {
        return Err(SvgParseError::TooLong);
    }
    let mut x = None;
    let mut y = None;
    let mut r = None;

    let mut tokens = svg.split_whitespace();
    match tokens.next() {
        Some("circle") => {}
        _ => return Err(SvgParseError::UnknownCommand(svg.to_string())),
    }

    for token in tokens {
        let (key, val) = token
            .split_once(':')
            .ok_or_else(|| SvgParseError::BadNumber(token.to_string()))?;
        match key {
            "x" => x = Some(val.parse::<i64>().map_err(|_| SvgParseError::BadNumber(val.to_string()))?),
            "y" => y = Some(val.parse::<i64>().map_err(|_| SvgParseError::BadNumber(val.to_string()))?),
            "r" => r = Some(val.parse::<u32>().map_err(|_| SvgParseError::BadNumber(val.to_string()))?),
            other => return Err(SvgParseError::UnknownCommand(other.to_string())),
        }
    }

    match (x, y, r) {
        (Some(x), Some(y), Some(r)) => Ok((x, y, r)),
        _ => Err(SvgParseError::MissingArgument("circle".to_string())),
    }
}

pub fn is_circle(svg: &str) -> bool {
    svg.trim_start().starts_with("circle")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_line() {
        let pts = parse_path("M 0 0 L 0 5").unwrap();
        assert_eq!(pts, vec![Point::new(0, 0, true), Point::new(0, 5, false)]);
    }

    #[test]
    fn test_relative_line() {
        let pts = parse_path("M 0 0 l 5 0").unwrap();
        assert_eq!(pts[1], Point::new(5, 0, false));
    }

    #[test]
    fn test_closed_polygon() {
        let pts = parse_path("M 0 0 L 10 0 L 10 10 L 0 10 Z").unwrap();
        assert_eq!(pts.first(), pts.last());
    }

    #[test]
    fn test_must_start_with_m() {
        assert_eq!(parse_path("L 0 0"), Err(SvgParseError::MissingMoveStart));
    }

    #[test]
    fn test_too_long() {
        let long = "M 0 0 ".to_string() + &"L 1 1 ".repeat(30);
        assert!(long.len() > MAX_SVG_LEN);
        assert_eq!(parse_path(&long), Err(SvgParseError::TooLong));
    }

    #[test]
    fn test_exactly_128_is_allowed_at_the_parser_level() {
        // MAX_SVG_LEN is a length check only; parse_path doesn't reject on
        // content at exactly the boundary so long as it's otherwise valid.
        let mut s = "M 0 0".to_string();
        while s.len() < 128 {
            s.push_str(" h 1");
        }
        s.truncate(128);
        // May or may not end on a full token; just assert the boundary itself
        // doesn't trip TooLong.
        assert_ne!(parse_path(&s), Err(SvgParseError::TooLong));
    }

    #[test]
    fn test_circle_mini_language() {
        assert_eq!(parse_circle("circle x:10 y:20 r:5").unwrap(), (10, 20, 5));
        assert!(is_circle("circle x:10 y:20 r:5"));
        assert!(!is_circle("M 0 0 L 1 1"));
    }

    #[test]
    fn test_h_and_v_relative() {
        let pts = parse_path("M 5 5 h 3 v -2").unwrap();
        assert_eq!(pts[1], Point::new(8, 5, false));
        assert_eq!(pts[2], Point::new(8, 3, false));
    }
}
