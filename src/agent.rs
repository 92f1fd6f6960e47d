use crate::game::Game;
use crate::net::Network;
use crate::pos::Dir;
use anyhow::{Result, ensure};
use rand::Rng;

/// Width of the feature vector fed to the network.
pub const INPUTS: usize = 8;
/// Output width, one unit per direction in `Dir::ALL` order.
pub const ACTIONS: usize = 4;

/// A genome plus the fixed feature encoding and argmax policy around it.
/// Carries no memory between decisions; identical (genome, state) pairs
/// always decide identically.
#[derive(Debug, Clone)]
pub struct Agent {
    net: Network,
}

/// Full topology for an agent network with the given hidden widths.
pub fn layer_sizes(hidden: &[usize]) -> Vec<usize> {
    let mut sizes = Vec::with_capacity(hidden.len() + 2);
    sizes.push(INPUTS);
    sizes.extend_from_slice(hidden);
    sizes.push(ACTIONS);
    sizes
}

impl Agent {
    pub fn new<R: Rng>(hidden: &[usize], rng: &mut R) -> Result<Self> {
        let net = Network::new(&layer_sizes(hidden), rng)?;
        Ok(Self { net })
    }

    /// Wraps an existing genome, which must have the agent's fixed input
    /// and output widths.
    pub fn from_network(net: Network) -> Result<Self> {
        ensure!(
            net.input_width() == INPUTS && net.output_width() == ACTIONS,
            "agent network must map {} inputs to {} actions, got {:?}",
            INPUTS,
            ACTIONS,
            net.layer_sizes()
        );
        Ok(Self { net })
    }

    pub fn network(&self) -> &Network {
        &self.net
    }

    pub fn into_network(self) -> Network {
        self.net
    }

    /// Encodes the game state into the 8 features the policy sees: head and
    /// apple positions normalized by the field size, the normalized apple
    /// delta, its Euclidean norm, and the normalized body length.
    pub fn encode(game: &Game) -> [f32; INPUTS] {
        let w = game.width() as f32;
        let h = game.height() as f32;
        let head = game.head();
        let apple = game.apple();

        let dx = (apple.x - head.x) as f32 / w;
        let dy = (apple.y - head.y) as f32 / h;

        [
            head.x as f32 / w,
            head.y as f32 / h,
            apple.x as f32 / w,
            apple.y as f32 / h,
            dx,
            dy,
            (dx * dx + dy * dy).sqrt(),
            game.len() as f32 / (w * h),
        ]
    }

    /// Picks the direction whose network output is largest; ties resolve to
    /// the first index in `Dir::ALL` order.
    pub fn decide(&self, game: &Game) -> Result<Dir> {
        let out = self.net.forward(&Self::encode(game))?;
        let mut best = 0;
        for (i, &v) in out.iter().enumerate().skip(1) {
            if v > out[best] {
                best = i;
            }
        }
        Ok(Dir::ALL[best])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(11)
    }

    #[test]
    fn encode_produces_the_expected_features() {
        let mut rng = rng();
        let game = Game::new(10, 10, 3, &mut rng);
        let f = Agent::encode(&game);
        let head = game.head();
        let apple = game.apple();

        assert_eq!(f[0], head.x as f32 / 10.0);
        assert_eq!(f[1], head.y as f32 / 10.0);
        assert_eq!(f[2], apple.x as f32 / 10.0);
        assert_eq!(f[3], apple.y as f32 / 10.0);
        assert_eq!(f[4], (apple.x - head.x) as f32 / 10.0);
        assert_eq!(f[5], (apple.y - head.y) as f32 / 10.0);
        assert!((f[6] - (f[4] * f[4] + f[5] * f[5]).sqrt()).abs() < 1e-6);
        assert_eq!(f[7], 3.0 / 100.0);
    }

    #[test]
    fn decide_is_deterministic_for_a_fixed_genome_and_state() {
        let mut rng = rng();
        let agent = Agent::new(&[6], &mut rng).unwrap();
        let game = Game::new(10, 10, 3, &mut rng);
        let first = agent.decide(&game).unwrap();
        for _ in 0..5 {
            assert_eq!(agent.decide(&game).unwrap(), first);
        }
    }

    #[test]
    fn from_network_enforces_the_agent_widths() {
        let mut rng = rng();
        let good = Network::new(&layer_sizes(&[5]), &mut rng).unwrap();
        assert!(Agent::from_network(good).is_ok());
        let bad = Network::new(&[6, 4], &mut rng).unwrap();
        assert!(Agent::from_network(bad).is_err());
    }

    #[test]
    fn argmax_ties_resolve_to_the_first_action() {
        // A zeroed network produces a uniform softmax, so every output ties
        // and the first direction in the fixed ordering must win.
        let mut rng = rng();
        let mut net = Network::new(&layer_sizes(&[]), &mut rng).unwrap();
        net.restore(&vec![0.0; net.param_count()]).unwrap();
        let agent = Agent::from_network(net).unwrap();
        let game = Game::new(10, 10, 3, &mut rng);
        assert_eq!(agent.decide(&game).unwrap(), Dir::Up);
    }
}
