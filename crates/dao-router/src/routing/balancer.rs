//! Weighted round-robin selection of replicas.

use crate::error::{DaoError, Result};

/// Largest integer that divides every weight.
///
/// Searches downward from the smallest weight. Returns 1 for an empty slice
/// or when a zero weight leaves no positive candidate.
pub fn gcd(weights: &[u32]) -> u32 {
    let Some(&min) = weights.iter().min() else {
        return 1;
    };
    let mut candidate = min;
    while candidate > 1 {
        if weights.iter().all(|w| w % candidate == 0) {
            return candidate;
        }
        candidate -= 1;
    }
    1
}

/// A fixed dispatch queue of replica indices and a cursor walking it.
#[derive(Debug, Clone, Default)]
pub struct Balancer {
    queue: Vec<usize>,
    cursor: usize,
}

impl Balancer {
    /// Build a queue for `weights`, shuffled with a clock-seeded generator.
    pub fn new(weights: &[u32]) -> Self {
        Self::with_rng(weights, &mut fastrand::Rng::new())
    }

    /// Build a queue where index `i` appears `weights[i] / gcd(weights)` times.
    pub fn with_rng(weights: &[u32], rng: &mut fastrand::Rng) -> Self {
        let g = gcd(weights);
        let mut queue = Vec::with_capacity(weights.iter().map(|w| (w / g) as usize).sum());
        for (index, weight) in weights.iter().enumerate() {
            queue.extend(std::iter::repeat(index).take((weight / g) as usize));
        }

        // Fixed swap rule, not a uniform shuffle.
        if weights.len() > 1 {
            let sum = queue.len();
            for _ in 0..sum {
                let x = rng.usize(0..sum);
                let other = sum % (x + 1);
                queue.swap(x, other);
            }
        }

        Self { queue, cursor: 0 }
    }

    /// Next replica index to dispatch to.
    pub fn next_index(&mut self) -> Result<usize> {
        match self.queue.len() {
            0 => Err(DaoError::NoDatabase),
            1 => Ok(self.queue[0]),
            len => {
                self.cursor %= len;
                let index = self.queue[self.cursor];
                self.cursor = (self.cursor + 1) % len;
                Ok(index)
            }
        }
    }

    pub fn queue(&self) -> &[usize] {
        &self.queue
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
