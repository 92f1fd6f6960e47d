use crate::pos::{Dir, Pos};
use rand::Rng;
use std::collections::VecDeque;

/// Deterministic grid snake game. One instance owns its state; callers drive
/// it with `set_direction` + `step` and re-arm it with `reset`. The only
/// randomness is apple placement, drawn from the injected generator.
pub struct Game {
    width: i32,
    height: i32,
    initial_length: usize,
    body: VecDeque<Pos>,
    dir: Dir,
    apple: Pos,
    score: usize,
    game_over: bool,
}

impl Game {
    /// The caller is responsible for a field large enough to hold the
    /// initial body plus at least one free cell for the apple.
    pub fn new<R: Rng>(width: i32, height: i32, initial_length: usize, rng: &mut R) -> Self {
        let mut game = Self {
            width,
            height,
            initial_length,
            body: VecDeque::new(),
            dir: Dir::Right,
            apple: Pos::new(0, 0),
            score: 0,
            game_over: false,
        };
        game.reset(rng);
        game
    }

    /// Re-initializes the body centered in the field (head first, extending
    /// left), direction RIGHT, score 0, and spawns a fresh apple.
    pub fn reset<R: Rng>(&mut self, rng: &mut R) {
        let cx = self.width / 2;
        let cy = self.height / 2;
        self.body.clear();
        for i in 0..self.initial_length as i32 {
            self.body.push_back(Pos::new(cx - i, cy));
        }
        self.dir = Dir::Right;
        self.score = 0;
        self.game_over = false;
        self.spawn_apple(rng);
    }

    fn spawn_apple<R: Rng>(&mut self, rng: &mut R) {
        loop {
            let p = Pos::new(rng.gen_range(0..self.width), rng.gen_range(0..self.height));
            if !self.body.contains(&p) {
                self.apple = p;
                break;
            }
        }
    }

    /// Ignores a request for the exact reverse of the current direction, so
    /// the snake can never die by instant reversal. Never errors.
    pub fn set_direction(&mut self, dir: Dir) {
        if dir != self.dir.opposite() {
            self.dir = dir;
        }
    }

    /// Advances one tick. Returns `false` without touching any state if the
    /// game is already over, and `false` when this move kills the snake.
    pub fn step<R: Rng>(&mut self, rng: &mut R) -> bool {
        if self.game_over {
            return false;
        }

        let head = self.body.front().expect("body is never empty");
        let (dx, dy) = self.dir.delta();
        let new_head = Pos::new(head.x + dx, head.y + dy);

        if new_head.x < 0 || new_head.x >= self.width || new_head.y < 0 || new_head.y >= self.height
        {
            self.game_over = true;
            return false;
        }

        // The tail cell is vacated this tick, so moving into it is legal.
        // When the apple is eaten the tail stays, but an eating head equals
        // the apple cell, which is never on the body.
        let tail_ix = self.body.len() - 1;
        if self.body.iter().take(tail_ix).any(|&p| p == new_head) {
            self.game_over = true;
            return false;
        }

        self.body.push_front(new_head);
        if new_head == self.apple {
            self.score += 1;
            self.spawn_apple(rng);
        } else {
            self.body.pop_back();
        }
        true
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn head(&self) -> Pos {
        *self.body.front().expect("body is never empty")
    }

    pub fn apple(&self) -> Pos {
        self.apple
    }

    /// Copy-out snapshot of the body, head first.
    pub fn body(&self) -> Vec<Pos> {
        self.body.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn score(&self) -> usize {
        self.score
    }

    pub fn is_over(&self) -> bool {
        self.game_over
    }

    pub fn direction(&self) -> Dir {
        self.dir
    }

    pub fn free_cells(&self) -> usize {
        (self.width as usize * self.height as usize).saturating_sub(self.body.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(7)
    }

    #[test]
    fn reset_places_centered_body_heading_right() {
        let mut rng = rng();
        let game = Game::new(15, 15, 3, &mut rng);
        assert_eq!(game.body(), vec![Pos::new(7, 7), Pos::new(6, 7), Pos::new(5, 7)]);
        assert_eq!(game.direction(), Dir::Right);
        assert_eq!(game.score(), 0);
        assert!(!game.is_over());
    }

    #[test]
    fn reversal_is_rejected_other_turns_succeed() {
        let mut rng = rng();
        let mut game = Game::new(15, 15, 3, &mut rng);
        game.set_direction(Dir::Left);
        assert_eq!(game.direction(), Dir::Right);
        game.set_direction(Dir::Up);
        assert_eq!(game.direction(), Dir::Up);
    }

    #[test]
    fn eating_grows_by_one_and_scores() {
        let mut rng = rng();
        let mut game = Game::new(15, 15, 3, &mut rng);
        game.apple = Pos::new(8, 7);
        assert!(game.step(&mut rng));
        assert_eq!(game.head(), Pos::new(8, 7));
        assert_eq!(game.score(), 1);
        assert_eq!(game.len(), 4);
        assert_ne!(game.apple(), Pos::new(8, 7));
        assert!(!game.body().contains(&game.apple()));
    }

    #[test]
    fn non_eating_step_keeps_length() {
        let mut rng = rng();
        let mut game = Game::new(15, 15, 3, &mut rng);
        game.apple = Pos::new(0, 0);
        assert!(game.step(&mut rng));
        assert_eq!(game.len(), 3);
        assert_eq!(game.score(), 0);
        assert_eq!(game.head(), Pos::new(8, 7));
    }

    #[test]
    fn running_off_the_field_is_terminal() {
        let mut rng = rng();
        let mut game = Game::new(15, 15, 3, &mut rng);
        game.apple = Pos::new(0, 0);
        // Head starts at x = 7; seven steps reach the rightmost column.
        for _ in 0..7 {
            assert!(game.step(&mut rng));
        }
        assert_eq!(game.head(), Pos::new(14, 7));
        assert!(!game.step(&mut rng));
        assert!(game.is_over());
        assert_eq!(game.score(), 0);
    }

    #[test]
    fn stepping_a_terminal_game_is_a_no_op() {
        let mut rng = rng();
        let mut game = Game::new(15, 15, 3, &mut rng);
        game.game_over = true;
        let body = game.body();
        let score = game.score();
        assert!(!game.step(&mut rng));
        assert_eq!(game.body(), body);
        assert_eq!(game.score(), score);
        assert!(game.is_over());
    }

    #[test]
    fn moving_into_the_vacating_tail_is_legal() {
        let mut rng = rng();
        let mut game = Game::new(15, 15, 3, &mut rng);
        // A 2x2 loop: the head re-enters the cell the tail leaves this tick.
        game.body = VecDeque::from(vec![
            Pos::new(5, 5),
            Pos::new(5, 6),
            Pos::new(6, 6),
            Pos::new(6, 5),
        ]);
        game.dir = Dir::Right;
        game.apple = Pos::new(0, 0);
        assert!(game.step(&mut rng));
        assert!(!game.is_over());
        assert_eq!(game.head(), Pos::new(6, 5));
    }

    #[test]
    fn hitting_a_non_tail_segment_is_terminal() {
        let mut rng = rng();
        let mut game = Game::new(15, 15, 5, &mut rng);
        game.body = VecDeque::from(vec![
            Pos::new(5, 5),
            Pos::new(5, 6),
            Pos::new(6, 6),
            Pos::new(6, 5),
            Pos::new(7, 5),
        ]);
        game.dir = Dir::Right;
        game.apple = Pos::new(0, 0);
        assert!(!game.step(&mut rng));
        assert!(game.is_over());
    }

    #[test]
    fn apple_never_spawns_on_the_body() {
        let mut rng = rng();
        let mut game = Game::new(5, 5, 3, &mut rng);
        for _ in 0..200 {
            game.spawn_apple(&mut rng);
            assert!(!game.body().contains(&game.apple()));
        }
    }

    #[test]
    fn reset_reuses_a_finished_game() {
        let mut rng = rng();
        let mut game = Game::new(15, 15, 3, &mut rng);
        game.game_over = true;
        game.score = 9;
        game.reset(&mut rng);
        assert!(!game.is_over());
        assert_eq!(game.score(), 0);
        assert_eq!(game.len(), 3);
    }
}
