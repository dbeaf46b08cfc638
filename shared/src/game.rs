//! Authoritative game simulation.
//!
//! [`Game::tick`] is the single simulation step run by the master node. It is
//! deterministic given the board state and the queued direction changes
//! (food placement draws fresh random cells, but only after all deaths are
//! resolved), so a promoted deputy picks up exactly where the lost master
//! stopped.

use std::collections::{BTreeSet, HashMap};

use log::debug;

use crate::field::{Field, PlacementError};
use crate::snake::{Coord, Direction, Snake};

/// A participant's score line. Roles and addresses live in the roster, not
/// here; this is purely what the simulation needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: i32,
    pub name: String,
    pub score: i32,
}

/// The board and everything on it.
#[derive(Debug, Clone)]
pub struct Game {
    pub name: String,
    pub width: i32,
    pub height: i32,
    pub food_static: i32,

    pub snakes: HashMap<i32, Snake>,
    pub players: HashMap<i32, Player>,
    pub foods: Vec<Coord>,
}

impl Game {
    pub fn new(name: &str, width: i32, height: i32, food_static: i32) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            food_static,
            snakes: HashMap::new(),
            players: HashMap::new(),
            foods: Vec::new(),
        }
    }

    /// Adds a player, spawning a snake for it unless it joins as a spectator.
    ///
    /// Placement runs before anything is inserted, so a full board leaves the
    /// game untouched and the join is rejected.
    pub fn add_player(
        &mut self,
        player_id: i32,
        player_name: &str,
        with_snake: bool,
    ) -> Result<(), PlacementError> {
        if with_snake {
            let field = Field::of_game(self);
            let (head, tail_offset) = field.place_snake()?;
            self.snakes
                .insert(player_id, Snake::spawn(player_id, head, tail_offset));
        }
        self.players.insert(
            player_id,
            Player {
                id: player_id,
                name: player_name.to_string(),
                score: 0,
            },
        );
        Ok(())
    }

    /// Removes a player's score line and turns its snake into a zombie; the
    /// body keeps colliding until something kills it.
    pub fn remove_player(&mut self, player_id: i32) {
        self.players.remove(&player_id);
        if let Some(snake) = self.snakes.get_mut(&player_id) {
            snake.zombie = true;
        }
    }

    /// Advances the world one step and returns the ids of players whose
    /// snakes died this tick.
    ///
    /// Every living snake moves one cell (using its queued direction change,
    /// if any), eats food under its new head, then all snakes (zombies
    /// included) go through all-pairs collision detection. Dead snakes are
    /// removed and food is replenished up to `food_static + players`.
    pub fn tick(&mut self, moves: &HashMap<i32, Direction>) -> Vec<i32> {
        let (width, height) = (self.width, self.height);

        for (player_id, snake) in &mut self.snakes {
            if snake.zombie {
                continue;
            }
            let direction = moves.get(player_id).copied().unwrap_or(snake.head_direction);
            snake.advance(direction, width, height);

            let head = snake.head();
            if let Some(idx) = self.foods.iter().position(|food| *food == head) {
                self.foods.remove(idx);
                snake.eating = true;
                if let Some(player) = self.players.get_mut(player_id) {
                    player.score += 1;
                }
            }
        }

        let bodies: HashMap<i32, Vec<Coord>> = self
            .snakes
            .iter()
            .map(|(id, snake)| (*id, snake.cells(width, height)))
            .collect();

        let mut dead = BTreeSet::new();
        for (id1, cells1) in &bodies {
            for (id2, cells2) in &bodies {
                if id1 == id2 {
                    if cells1[1..].contains(&cells1[0]) {
                        dead.insert(*id1);
                    }
                    continue;
                }
                // A head landing on any cell of the other snake kills it;
                // two heads on the same cell kill both.
                if cells1.contains(&cells2[0]) {
                    dead.insert(*id2);
                }
                if cells2.contains(&cells1[0]) {
                    dead.insert(*id1);
                }
            }
        }

        for id in &dead {
            self.snakes.remove(id);
            debug!("snake of player {id} died");
        }

        self.replenish_food();
        dead.into_iter().collect()
    }

    /// Tops the food supply up to `food_static + players`. A surplus (players
    /// left since the food was placed) is left alone, never collected.
    fn replenish_food(&mut self) {
        let target = self.food_static as usize + self.players.len();
        let deficit = target.saturating_sub(self.foods.len());
        if deficit == 0 {
            return;
        }
        let field = Field::of_game(self);
        self.foods.extend(field.sample_empty(deficit));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game_with_snake(head: Coord, tail_offset: Coord) -> Game {
        let mut game = Game::new("g", 20, 20, 0);
        game.players.insert(
            1,
            Player {
                id: 1,
                name: "alice".to_string(),
                score: 0,
            },
        );
        game.snakes.insert(1, Snake::spawn(1, head, tail_offset));
        game
    }

    #[test]
    fn snakes_advance_along_their_heading() {
        let mut game = game_with_snake(Coord::new(5, 5), Coord::new(0, 1));
        let dead = game.tick(&HashMap::new());
        assert!(dead.is_empty());
        assert_eq!(game.snakes[&1].head(), Coord::new(5, 4));
    }

    #[test]
    fn queued_move_changes_heading() {
        let mut game = game_with_snake(Coord::new(5, 5), Coord::new(0, 1));
        let moves = HashMap::from([(1, Direction::Left)]);
        game.tick(&moves);
        assert_eq!(game.snakes[&1].head_direction, Direction::Left);
        assert_eq!(game.snakes[&1].head(), Coord::new(4, 5));
    }

    #[test]
    fn reversed_move_is_a_no_op() {
        let mut game = game_with_snake(Coord::new(5, 5), Coord::new(0, 1));
        let moves = HashMap::from([(1, Direction::Down)]);
        game.tick(&moves);
        assert_eq!(game.snakes[&1].head_direction, Direction::Up);
        assert_eq!(game.snakes[&1].head(), Coord::new(5, 4));
    }

    #[test]
    fn eating_scores_and_grows_next_tick() {
        let mut game = game_with_snake(Coord::new(5, 5), Coord::new(0, 1));
        game.foods = vec![Coord::new(5, 4)];
        game.food_static = 0;

        game.tick(&HashMap::new());
        assert_eq!(game.players[&1].score, 1);
        assert!(game.snakes[&1].eating);
        assert_eq!(game.snakes[&1].cells(20, 20).len(), 2);

        game.foods.clear();
        game.tick(&HashMap::new());
        assert_eq!(game.snakes[&1].cells(20, 20).len(), 3);
    }

    #[test]
    fn running_into_a_body_kills_the_runner() {
        let mut game = game_with_snake(Coord::new(5, 5), Coord::new(0, 1));
        // A vertical wall right where the first snake's head will move.
        game.players.insert(
            2,
            Player {
                id: 2,
                name: "bob".to_string(),
                score: 0,
            },
        );
        game.snakes.insert(
            2,
            Snake {
                player_id: 2,
                points: vec![Coord::new(5, 1), Coord::new(0, 3)],
                zombie: false,
                head_direction: Direction::Up,
                eating: false,
            },
        );
        // Freeze the wall so only snake 1 moves into it.
        game.snakes.get_mut(&2).unwrap().zombie = true;

        let dead = game.tick(&HashMap::new());
        assert_eq!(dead, vec![1]);
        assert!(!game.snakes.contains_key(&1));
        assert!(game.snakes.contains_key(&2));
    }

    #[test]
    fn head_on_head_kills_both() {
        let mut game = game_with_snake(Coord::new(5, 6), Coord::new(0, 1));
        game.players.insert(
            2,
            Player {
                id: 2,
                name: "bob".to_string(),
                score: 0,
            },
        );
        // Heading down from above; both heads land on (5, 5).
        game.snakes
            .insert(2, Snake::spawn(2, Coord::new(5, 4), Coord::new(0, -1)));

        let dead = game.tick(&HashMap::new());
        assert_eq!(dead, vec![1, 2]);
        assert!(game.snakes.is_empty());
    }

    #[test]
    fn food_replenishes_to_static_plus_players() {
        let mut game = game_with_snake(Coord::new(5, 5), Coord::new(0, 1));
        game.food_static = 2;
        game.tick(&HashMap::new());
        assert_eq!(game.foods.len(), 3);
    }

    #[test]
    fn food_surplus_is_not_collected() {
        let mut game = game_with_snake(Coord::new(5, 5), Coord::new(0, 1));
        game.food_static = 0;
        game.foods = vec![Coord::new(1, 1), Coord::new(2, 2), Coord::new(3, 3)];
        game.tick(&HashMap::new());
        assert_eq!(game.foods.len(), 3);
    }

    #[test]
    fn departed_player_becomes_zombie_and_stops_moving() {
        let mut game = game_with_snake(Coord::new(5, 5), Coord::new(0, 1));
        game.remove_player(1);
        assert!(game.snakes[&1].zombie);

        game.tick(&HashMap::new());
        assert_eq!(game.snakes[&1].head(), Coord::new(5, 5));
    }
}
