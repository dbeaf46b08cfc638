//! Grid primitives and the keyframe snake body.
//!
//! A snake body is stored as a *keyframe polyline*: the first entry is the
//! absolute head cell, every following entry is a signed offset of the form
//! `(dx, 0)` or `(0, dy)` describing a straight segment toward the tail.
//! Moving a snake only touches the ends of that list, so a step is O(1)
//! regardless of body length. Expansion to explicit cells happens on demand
//! via [`Snake::cells`].
//!
//! Keyframe invariants: no segment has zero length, and the first segment
//! always points opposite the current heading.

use serde::{Deserialize, Serialize};

/// A cell on the torus-wrapped playfield.
///
/// Also used for the relative segment offsets inside a keyframe polyline;
/// absolute coordinates are always non-negative, offsets carry a sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Head direction of a snake. The grid has y growing downward, so `Up`
/// decreases y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// The 180-degree reverse of this direction.
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// Unit cell offset of one step in this direction.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }
}

/// A snake owned by one player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snake {
    pub player_id: i32,
    /// Keyframe polyline: absolute head cell, then signed segment offsets.
    pub points: Vec<Coord>,
    /// Set once the owning player left the game; the body stops moving but
    /// keeps colliding until something kills it.
    pub zombie: bool,
    pub head_direction: Direction,
    /// Set when the head landed on food this tick; the next advance keeps the
    /// tail instead of shrinking it, growing the snake by one cell.
    pub eating: bool,
}

impl Snake {
    /// Creates a two-cell snake from an absolute head cell and the unit
    /// offset of its tail. The heading opposes the tail offset axis.
    pub fn spawn(player_id: i32, head: Coord, tail_offset: Coord) -> Self {
        let head_direction = match (tail_offset.x, tail_offset.y) {
            (0, 1) => Direction::Up,
            (0, -1) => Direction::Down,
            (1, 0) => Direction::Left,
            _ => Direction::Right,
        };
        Self {
            player_id,
            points: vec![head, tail_offset],
            zombie: false,
            head_direction,
            eating: false,
        }
    }

    /// Absolute head cell.
    pub fn head(&self) -> Coord {
        self.points[0]
    }

    /// Advances the snake one cell.
    ///
    /// A requested direction equal to the current heading, or its 180-degree
    /// reverse, continues straight; any other direction turns. Unless the
    /// snake ate last tick, the tail shrinks by one cell afterwards.
    pub fn advance(&mut self, direction: Direction, width: i32, height: i32) {
        let head = self.points[0];
        if direction == self.head_direction || direction == self.head_direction.opposite() {
            // Straight ahead: shift the head and stretch the first segment.
            match self.head_direction {
                Direction::Up => {
                    self.points[0].y = (head.y - 1).rem_euclid(height);
                    self.points[1].y += 1;
                }
                Direction::Down => {
                    self.points[0].y = (head.y + 1) % height;
                    self.points[1].y -= 1;
                }
                Direction::Left => {
                    self.points[0].x = (head.x - 1).rem_euclid(width);
                    self.points[1].x += 1;
                }
                Direction::Right => {
                    self.points[0].x = (head.x + 1) % width;
                    self.points[1].x -= 1;
                }
            }
        } else {
            // Turn: the old head becomes a unit segment behind the new head.
            let (dx, dy) = direction.offset();
            let new_head = Coord::new((head.x + dx).rem_euclid(width), (head.y + dy).rem_euclid(height));
            self.points[0] = Coord::new(-dx, -dy);
            self.points.insert(0, new_head);
            self.head_direction = direction;
        }

        if self.eating {
            self.eating = false;
        } else {
            self.shrink_tail();
        }
    }

    /// Consumes one cell from the last segment, dropping it at zero length.
    fn shrink_tail(&mut self) {
        let last = self.points.len() - 1;
        let tail = &mut self.points[last];
        if tail.x != 0 {
            tail.x -= tail.x.signum();
            if tail.x == 0 {
                self.points.pop();
            }
        } else {
            tail.y -= tail.y.signum();
            if tail.y == 0 {
                self.points.pop();
            }
        }
    }

    /// Expands the keyframe polyline into explicit cells, head first.
    pub fn cells(&self, width: i32, height: i32) -> Vec<Coord> {
        let mut out = Vec::new();
        let Coord { mut x, mut y } = self.points[0];
        out.push(Coord::new(x, y));

        for segment in &self.points[1..] {
            if segment.y != 0 {
                let step = segment.y.signum();
                for _ in 0..segment.y.abs() {
                    y = (y + step).rem_euclid(height);
                    out.push(Coord::new(x, y));
                }
            } else {
                let step = segment.x.signum();
                for _ in 0..segment.x.abs() {
                    x = (x + step).rem_euclid(width);
                    out.push(Coord::new(x, y));
                }
            }
        }

        out
    }
}

/// Re-derives a keyframe polyline from a list of 4-adjacent cells.
///
/// Inverse of [`Snake::cells`]: consecutive steps along the same axis and
/// sign collapse into a single segment. Used when importing bodies that
/// arrive as explicit point lists.
pub fn compress_cells(cells: &[Coord], width: i32, height: i32) -> Vec<Coord> {
    let mut out = Vec::with_capacity(cells.len());
    out.push(cells[0]);
    let mut segments = 0usize;

    for pair in cells.windows(2) {
        let dx = unit_step(pair[0].x, pair[1].x, width);
        let dy = unit_step(pair[0].y, pair[1].y, height);
        let extend = segments > 0 && {
            let last = out[out.len() - 1];
            (dx != 0 && last.x != 0 && last.x.signum() == dx)
                || (dy != 0 && last.y != 0 && last.y.signum() == dy)
        };
        if extend {
            let last = out.last_mut().expect("segment list is never empty");
            last.x += dx;
            last.y += dy;
        } else {
            out.push(Coord::new(dx, dy));
            segments += 1;
        }
    }

    out
}

/// Signed unit step from `a` to an adjacent `b` on a ring of size `modulus`.
fn unit_step(a: i32, b: i32, modulus: i32) -> i32 {
    let d = (b - a).rem_euclid(modulus);
    if d == modulus - 1 {
        -1
    } else {
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snake_up_at(head: Coord) -> Snake {
        Snake::spawn(1, head, Coord::new(0, 1))
    }

    #[test]
    fn spawn_heading_opposes_tail_offset() {
        assert_eq!(snake_up_at(Coord::new(5, 5)).head_direction, Direction::Up);
        let s = Snake::spawn(1, Coord::new(5, 5), Coord::new(-1, 0));
        assert_eq!(s.head_direction, Direction::Right);
    }

    #[test]
    fn straight_move_keeps_length() {
        let mut s = snake_up_at(Coord::new(5, 5));
        s.advance(Direction::Up, 10, 10);
        assert_eq!(s.head(), Coord::new(5, 4));
        assert_eq!(s.cells(10, 10), vec![Coord::new(5, 4), Coord::new(5, 5)]);
    }

    #[test]
    fn move_wraps_around_the_torus() {
        let mut s = snake_up_at(Coord::new(0, 0));
        s.advance(Direction::Up, 10, 10);
        assert_eq!(s.head(), Coord::new(0, 9));

        let mut s = Snake::spawn(1, Coord::new(9, 3), Coord::new(-1, 0));
        s.advance(Direction::Right, 10, 10);
        assert_eq!(s.head(), Coord::new(0, 3));
    }

    #[test]
    fn reversed_direction_continues_straight() {
        let mut s = snake_up_at(Coord::new(5, 5));
        s.advance(Direction::Down, 10, 10);
        assert_eq!(s.head_direction, Direction::Up);
        assert_eq!(s.head(), Coord::new(5, 4));
    }

    #[test]
    fn turn_prepends_new_head() {
        let mut s = snake_up_at(Coord::new(5, 5));
        s.advance(Direction::Left, 10, 10);
        assert_eq!(s.head_direction, Direction::Left);
        assert_eq!(s.head(), Coord::new(4, 5));
        assert_eq!(s.cells(10, 10), vec![Coord::new(4, 5), Coord::new(5, 5)]);
    }

    #[test]
    fn eating_grows_by_exactly_one_cell() {
        let mut s = snake_up_at(Coord::new(5, 5));
        s.eating = true;
        s.advance(Direction::Up, 10, 10);
        assert!(!s.eating);
        assert_eq!(s.cells(10, 10).len(), 3);

        // Next plain move keeps the new length.
        s.advance(Direction::Up, 10, 10);
        assert_eq!(s.cells(10, 10).len(), 3);
    }

    #[test]
    fn long_walk_stays_connected() {
        let mut s = snake_up_at(Coord::new(5, 5));
        s.eating = true;
        s.advance(Direction::Up, 10, 10);
        s.eating = true;
        s.advance(Direction::Left, 10, 10);
        s.eating = true;
        s.advance(Direction::Down, 10, 10);
        let cells = s.cells(10, 10);
        assert_eq!(cells.len(), 5);
        for pair in cells.windows(2) {
            let dx = (pair[0].x - pair[1].x).rem_euclid(10);
            let dy = (pair[0].y - pair[1].y).rem_euclid(10);
            assert!(
                (dx == 0 && (dy == 1 || dy == 9)) || (dy == 0 && (dx == 1 || dx == 9)),
                "cells {:?} and {:?} are not adjacent",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn keyframe_roundtrip() {
        let mut s = snake_up_at(Coord::new(2, 2));
        for dir in [
            Direction::Up,
            Direction::Left,
            Direction::Left,
            Direction::Down,
            Direction::Down,
            Direction::Right,
        ] {
            s.eating = true;
            s.advance(dir, 10, 10);
        }
        let cells = s.cells(10, 10);
        let keyframe = compress_cells(&cells, 10, 10);
        assert_eq!(keyframe, s.points);
    }

    #[test]
    fn keyframe_roundtrip_across_the_wrap() {
        let s = Snake {
            player_id: 1,
            points: vec![Coord::new(1, 0), Coord::new(-3, 0), Coord::new(0, 2)],
            zombie: false,
            head_direction: Direction::Right,
            eating: false,
        };
        let cells = s.cells(10, 10);
        assert_eq!(cells[2], Coord::new(9, 0));
        assert_eq!(compress_cells(&cells, 10, 10), s.points);
    }
}
