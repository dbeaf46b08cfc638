//! Scratch occupancy grid for spawn placement and food spawning.

use rand::Rng;

use crate::game::Game;
use crate::snake::Coord;

/// Snake placement failure; surfaces to the caller that tried to join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    #[error("place for snake head not found")]
    HeadSite,
    #[error("place for snake tail not found")]
    TailSite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    Empty,
    Food,
    Snake,
}

/// A one-shot rasterization of the board, rebuilt from the game whenever
/// placement decisions are needed.
pub(crate) struct Field {
    width: i32,
    height: i32,
    cells: Vec<Cell>,
}

impl Field {
    pub(crate) fn of_game(game: &Game) -> Self {
        let mut field = Field {
            width: game.width,
            height: game.height,
            cells: vec![Cell::Empty; (game.width * game.height) as usize],
        };
        for snake in game.snakes.values() {
            for cell in snake.cells(game.width, game.height) {
                field.set(cell, Cell::Snake);
            }
        }
        for food in &game.foods {
            field.set(*food, Cell::Food);
        }
        field
    }

    fn at(&self, x: i32, y: i32) -> Cell {
        self.cells[(y * self.width + x) as usize]
    }

    fn set(&mut self, cell: Coord, state: Cell) {
        self.cells[(cell.y * self.width + cell.x) as usize] = state;
    }

    fn empty_cells(&self) -> Vec<Coord> {
        let mut out = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                if self.at(x, y) == Cell::Empty {
                    out.push(Coord::new(x, y));
                }
            }
        }
        out
    }

    /// Picks a spawn site for a new snake: an empty head cell whose toroidal
    /// 5x5 neighbourhood contains no snake cell, plus the unit offset of an
    /// adjacent tail cell free of food.
    pub(crate) fn place_snake(&self) -> Result<(Coord, Coord), PlacementError> {
        let head = self.find_head_site()?;
        let tail = self.find_tail_offset(head)?;
        Ok((head, tail))
    }

    fn find_head_site(&self) -> Result<Coord, PlacementError> {
        'candidates: for cell in self.empty_cells() {
            for dy in -2..=2 {
                for dx in -2..=2 {
                    let x = (cell.x + dx).rem_euclid(self.width);
                    let y = (cell.y + dy).rem_euclid(self.height);
                    if self.at(x, y) == Cell::Snake {
                        continue 'candidates;
                    }
                }
            }
            return Ok(cell);
        }
        Err(PlacementError::HeadSite)
    }

    fn find_tail_offset(&self, head: Coord) -> Result<Coord, PlacementError> {
        let candidates = [
            Coord::new(0, 1),
            Coord::new(1, 0),
            Coord::new(0, -1),
            Coord::new(-1, 0),
        ];
        for offset in candidates {
            let x = (head.x + offset.x).rem_euclid(self.width);
            let y = (head.y + offset.y).rem_euclid(self.height);
            if self.at(x, y) != Cell::Food {
                return Ok(offset);
            }
        }
        Err(PlacementError::TailSite)
    }

    /// Draws up to `count` distinct empty cells uniformly at random. Returns
    /// fewer when the board has fewer empty cells.
    pub(crate) fn sample_empty(&self, count: usize) -> Vec<Coord> {
        let mut empties = self.empty_cells();
        if empties.len() <= count {
            return empties;
        }
        let mut rng = rand::rng();
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let idx = rng.random_range(0..empties.len());
            out.push(empties.swap_remove(idx));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snake::{Direction, Snake};
    use std::collections::HashSet;

    fn empty_game() -> Game {
        Game::new("g", 10, 10, 0)
    }

    #[test]
    fn places_on_an_empty_board() {
        let game = empty_game();
        let field = Field::of_game(&game);
        let (head, tail) = field.place_snake().unwrap();
        assert_eq!(head, Coord::new(0, 0));
        assert_eq!(tail, Coord::new(0, 1));
    }

    #[test]
    fn head_site_avoids_snake_neighbourhood() {
        let mut game = empty_game();
        // One snake cell at the origin: every candidate within two cells of
        // it (toroidally) must be skipped.
        game.snakes.insert(
            1,
            Snake {
                player_id: 1,
                points: vec![Coord::new(0, 0), Coord::new(0, 1)],
                zombie: false,
                head_direction: Direction::Up,
                eating: false,
            },
        );
        let field = Field::of_game(&game);
        let (head, _) = field.place_snake().unwrap();
        for dy in -2..=2i32 {
            for dx in -2..=2i32 {
                let x = dx.rem_euclid(10);
                let y = dy.rem_euclid(10);
                assert!(!(head.x == x && head.y == y), "head {head:?} too close");
            }
        }
    }

    #[test]
    fn rejects_when_no_clear_neighbourhood_exists() {
        let mut game = empty_game();
        // Rows 0 and 5 fully covered: every 5-row window touches one of them.
        game.snakes.insert(
            1,
            Snake {
                player_id: 1,
                points: vec![
                    Coord::new(0, 0),
                    Coord::new(9, 0),
                    Coord::new(0, 5),
                    Coord::new(-9, 0),
                ],
                zombie: false,
                head_direction: Direction::Right,
                eating: false,
            },
        );
        let field = Field::of_game(&game);
        assert_eq!(field.place_snake(), Err(PlacementError::HeadSite));
    }

    #[test]
    fn rejects_when_every_tail_cell_is_food() {
        let mut game = empty_game();
        game.foods = vec![
            Coord::new(0, 1),
            Coord::new(1, 0),
            Coord::new(0, 9),
            Coord::new(9, 0),
        ];
        let field = Field::of_game(&game);
        assert_eq!(field.place_snake(), Err(PlacementError::TailSite));
    }

    #[test]
    fn food_sampling_returns_distinct_empty_cells() {
        let mut game = empty_game();
        game.foods = vec![Coord::new(3, 3)];
        let field = Field::of_game(&game);
        let sampled = field.sample_empty(20);
        assert_eq!(sampled.len(), 20);
        let distinct: HashSet<_> = sampled.iter().collect();
        assert_eq!(distinct.len(), 20);
        assert!(!sampled.contains(&Coord::new(3, 3)));
    }

    #[test]
    fn food_sampling_is_capped_by_free_cells() {
        let game = empty_game();
        let field = Field::of_game(&game);
        assert_eq!(field.sample_empty(1000).len(), 100);
    }
}
