use std::io::{self, Write};

/**
Finds the parity of <input, alpha> ^ <output, beta>, where <_,_> is the inner product
over F_2. Taken from http://www.graphics.stanford.edu/~seander/bithacks.html#ParityMultiply

input   Input value.
output  Output value.
alpha   Input mask.
beta    Output mask.
*/
pub fn parity_masks(input: u64,
                    output: u64,
                    alpha: u64,
                    beta: u64)
                    -> u64 {
    let mut y = (input & alpha) | ((output & beta) << 32);

    y ^= y >> 1;
    y ^= y >> 2;
    y = (y & 0x1111111111111111).wrapping_mul(0x1111111111111111);
    (y >> 60) & 1
}

/**
A struct representing a progress bar for progress printing on the command line.

accumulated     Progress accumulated since the last printed step.
step            The progress contributed by a single item, in percent.
*/
pub struct ProgressBar {
    accumulated: f64,
    step: f64,
}

impl ProgressBar {
    /**
    Creates a new progress bar.

    num_items       Number of items to count the progress for.
    */
    pub fn new(num_items: usize) -> ProgressBar {
        ProgressBar {
            accumulated: 0.0,
            step: 100.0 / (num_items as f64),
        }
    }

    /**
    Increments the current progress of the progress bar. The progress bar prints if
    a new step was reached.
    */
    pub fn increment(&mut self) {
        self.accumulated += self.step;

        while self.accumulated >= 1.0 {
            print!("=");
            io::stdout().flush().expect("Could not flush stdout");
            self.accumulated -= 1.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_of_masked_values() {
        assert_eq!(parity_masks(0b101, 0, 0b111, 0), 0);
        assert_eq!(parity_masks(0b110, 0, 0b011, 0), 1);

        // Input and output parities combine with XOR
        assert_eq!(parity_masks(0b110, 0b001, 0b011, 0b001), 0);
        assert_eq!(parity_masks(0b110, 0b001, 0b111, 0b001), 1);
    }
}
