use std::collections::hash_map::Entry;
use std::sync::mpsc;

use crossbeam_utils::thread;
use fnv::{FnvHashMap, FnvHashSet};
use rand::Rng;
use smallvec::SmallVec;

use crate::block::BitString;
use crate::cipher::SpnCipher;
use crate::utility::ProgressBar;

/* A plaintext pair with a fixed difference and the corresponding ciphertext
 * pair.
 */
#[derive(Clone, Debug)]
pub struct TextPair {
    pub plaintexts: (BitString, BitString),
    pub ciphertexts: (BitString, BitString),
}

/* Candidate values for the last round subkey, per S-box block. */
pub type SubkeyCandidates = FnvHashMap<usize, FnvHashSet<BitString>>;

/* Differential cryptanalysis of the network. Pushes an input difference
 * through all but the last round of the cipher and narrows the last round
 * subkey per S-box block from observed ciphertext pairs.
 *
 * cipher   The cipher under analysis.
 */
pub struct DifferentialAnalysis<'a> {
    cipher: &'a SpnCipher,
}

impl<'a> DifferentialAnalysis<'a> {
    pub fn new(cipher: &SpnCipher) -> DifferentialAnalysis {
        DifferentialAnalysis { cipher }
    }

    /* Propagates a first round input difference to the input of the last
     * round. Positions whose value depends on the propagation path taken
     * are unresolved in the result.
     *
     * input_difference     The difference between the two plaintexts.
     */
    pub fn last_round_input_difference(&self, input_difference: &BitString) -> BitString {
        let params = &self.cipher.params;

        assert_eq!(input_difference.width(), params.block_size,
                   "invalid input difference width");

        let mut difference = *input_difference;

        for _ in 0..params.rounds - 1 {
            difference = self.sbox_output_difference(&difference)
                             .permute(&params.permutation);
        }

        difference
    }

    /* The output difference pattern of one substitution layer. A chunk with
     * several reachable output differences keeps the positions they agree on
     * and marks the rest unresolved.
     */
    fn sbox_output_difference(&self, difference: &BitString) -> BitString {
        let sbox = &self.cipher.sbox;

        let outputs: SmallVec<[BitString; 8]> =
            difference.split(self.cipher.params.sbox_size)
                      .iter()
                      .map(|chunk| {
                          let candidates = if chunk.num_wild() == 0 {
                              sbox.output_differences(chunk)
                          } else {
                              self.unique_output_differences(chunk)
                          };

                          let mut merged = candidates[0];

                          for candidate in &candidates[1..] {
                              merged = merged.merge(candidate);
                          }

                          merged
                      })
                      .collect();

        BitString::concat(&outputs)
    }

    /* All output differences reachable from any resolution of a partly
     * known input difference chunk.
     */
    fn unique_output_differences(&self, chunk: &BitString) -> Vec<BitString> {
        let mut seen = FnvHashSet::default();
        let mut result = vec![];

        for resolution in chunk.resolutions() {
            for difference in self.cipher.sbox.output_differences(&resolution) {
                if seen.insert(difference) {
                    result.push(difference);
                }
            }
        }

        result
    }

    /* Samples plaintext pairs with the given difference and encrypts both
     * halves under the key.
     *
     * count                Number of pairs to sample.
     * key                  The cipher key.
     * input_difference     The difference between the two plaintexts.
     */
    pub fn generate_text_pairs<R: Rng>(&self,
                                       count: usize,
                                       key: &BitString,
                                       input_difference: &BitString,
                                       rng: &mut R)
                                       -> Vec<TextPair> {
        (0..count)
            .map(|_| {
                let first = BitString::random(self.cipher.params.block_size, rng);
                let second = first.xor(input_difference);

                TextPair {
                    plaintexts: (first, second),
                    ciphertexts: (self.cipher.encrypt(&first, key),
                                  self.cipher.encrypt(&second, key)),
                }
            })
            .collect()
    }

    /* Narrows the last round subkey candidates over several trial input
     * differences. Candidate sets only ever shrink as pairs are added.
     *
     * input_differences    The trial differences, fully resolved.
     * num_pairs            Number of text pairs to sample per difference.
     * key                  The cipher key used by the sampling oracle.
     */
    pub fn analyze_input_differences<R: Rng>(&self,
                                             input_differences: &[BitString],
                                             num_pairs: usize,
                                             key: &BitString,
                                             rng: &mut R)
                                             -> SubkeyCandidates {
        let mut subkeys = SubkeyCandidates::default();

        for input_difference in input_differences {
            let last_round_difference = self.last_round_input_difference(input_difference);
            let pairs = self.generate_text_pairs(num_pairs, key, input_difference, rng);
            let partial = self.analyze_pairs(&last_round_difference, &pairs);

            intersect_subkeys(&mut subkeys, partial);
        }

        subkeys
    }

    /* Scans the ciphertext pairs with worker threads. Every pair narrows
     * blocks independently and set intersection commutes, so the partial
     * results are reduced in arbitrary order.
     */
    fn analyze_pairs(&self,
                     last_round_difference: &BitString,
                     pairs: &[TextPair])
                     -> SubkeyCandidates {
        let num_threads = num_cpus::get();
        let (result_tx, result_rx) = mpsc::channel();

        thread::scope(|scope| {
            for t in 0..num_threads {
                let result_tx = result_tx.clone();

                scope.spawn(move |_| {
                    let mut progress_bar = ProgressBar::new(pairs.len());
                    let mut result = SubkeyCandidates::default();

                    for pair in pairs.iter().skip(t).step_by(num_threads) {
                        let partial = self.pair_subkeys(last_round_difference,
                                                        &pair.ciphertexts);

                        intersect_subkeys(&mut result, partial);
                        progress_bar.increment();
                    }

                    result_tx.send(result).expect("Thread could not send result");
                });
            }
        }).expect("Could not run analysis threads");

        let mut subkeys = SubkeyCandidates::default();

        for _ in 0..num_threads {
            let thread_result = result_rx.recv().expect("Main could not receive result");

            intersect_subkeys(&mut subkeys, thread_result);
        }

        subkeys
    }

    /* Extracts subkey candidates from a single ciphertext pair. A block is
     * only worth attacking if both the propagated input difference and the
     * observed output difference are nonzero; at most one unresolved
     * position can be disambiguated, so blocks with two or more are
     * skipped.
     *
     * last_round_difference    The propagated last round input difference.
     * ciphertexts              The observed ciphertext pair.
     */
    fn pair_subkeys(&self,
                    last_round_difference: &BitString,
                    ciphertexts: &(BitString, BitString))
                    -> SubkeyCandidates {
        let sbox_size = self.cipher.params.sbox_size;

        let ciphertext_difference = ciphertexts.0.xor(&ciphertexts.1);
        let first_blocks = ciphertexts.0.split(sbox_size);
        let second_blocks = ciphertexts.1.split(sbox_size);
        let input_blocks = last_round_difference.split(sbox_size);
        let output_blocks = ciphertext_difference.split(sbox_size);

        let mut subkeys = SubkeyCandidates::default();

        for block in 0..input_blocks.len() {
            let input_difference = &input_blocks[block];
            let output_difference = &output_blocks[block];

            if input_difference.is_zero()
                || output_difference.is_zero()
                || input_difference.num_wild() >= 2 {
                continue;
            }

            let resolved = match self.determine_input_difference(input_difference,
                                                                 output_difference) {
                Some(difference) => difference,
                None => continue,
            };

            let output_pairs = self.output_pairs(&resolved);
            let matching_pairs = match output_pairs.get(output_difference) {
                Some(pairs) => pairs,
                None => continue,
            };

            let values = subkey_values(matching_pairs,
                                       &first_blocks[block],
                                       &second_blocks[block]);

            subkeys.insert(block, values);
        }

        subkeys
    }

    /* Resolves at most one unresolved position of a propagated difference
     * chunk against the input differences that can actually produce the
     * observed output difference.
     */
    fn determine_input_difference(&self,
                                  input_difference: &BitString,
                                  output_difference: &BitString)
                                  -> Option<BitString> {
        let resolutions = input_difference.resolutions();

        self.cipher.sbox
            .input_differences(output_difference)
            .into_iter()
            .find(|difference| resolutions.contains(difference))
    }

    /* All S-box output pairs for a fixed input difference, grouped by their
     * output difference.
     */
    fn output_pairs(&self, input_difference: &BitString)
                    -> FnvHashMap<BitString, Vec<(BitString, BitString)>> {
        let sbox = &self.cipher.sbox;
        let size = sbox.size;
        let difference = input_difference.value();

        let mut pairs: FnvHashMap<BitString, Vec<(BitString, BitString)>> =
            FnvHashMap::default();

        for input in 0..(1u64 << size) {
            let first = sbox.lookup(input);
            let second = sbox.lookup(input ^ difference);

            pairs.entry(BitString::from_value(first ^ second, size))
                 .or_insert_with(Vec::new)
                 .push((BitString::from_value(first, size),
                        BitString::from_value(second, size)));
        }

        pairs
    }
}

/* XORs the consistent S-box output pairs against the observed ciphertext
 * chunks. The key mixed in after the last substitution is what separates
 * the two.
 */
fn subkey_values(output_pairs: &[(BitString, BitString)],
                 first_ciphertext: &BitString,
                 second_ciphertext: &BitString)
                 -> FnvHashSet<BitString> {
    let mut values = FnvHashSet::default();

    for (first, second) in output_pairs {
        values.insert(first.xor(first_ciphertext));
        values.insert(second.xor(second_ciphertext));
    }

    values
}

/* Narrows the accumulated candidate sets with the blocks of a partial
 * result. Blocks absent from the partial result carry no information and
 * are left untouched.
 */
fn intersect_subkeys(subkeys: &mut SubkeyCandidates, partial: SubkeyCandidates) {
    for (block, candidates) in partial {
        match subkeys.entry(block) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().retain(|value| candidates.contains(value));
            }
            Entry::Vacant(entry) => {
                entry.insert(candidates);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::cipher::{Sbox, SpnCipher, DIFFERENTIAL_SBOX, STANDARD_SPN};

    use super::*;

    fn differential_cipher() -> SpnCipher {
        SpnCipher::new(STANDARD_SPN.clone(), Sbox::new(3, DIFFERENTIAL_SBOX.to_vec()))
    }

    fn bits(s: &str) -> BitString {
        s.parse().unwrap()
    }

    #[test]
    fn deterministic_difference_propagation() {
        let cipher = differential_cipher();
        let analysis = DifferentialAnalysis::new(&cipher);

        // The 001 -> 001 transition is the only one in its table row, so a
        // single substitution layer resolves the chunk fully
        let output = analysis.sbox_output_difference(&bits("001000000"));
        assert_eq!(output, bits("001000000"));
        assert_eq!(output.num_wild(), 0);
    }

    #[test]
    fn propagation_marks_forked_positions() {
        let cipher = differential_cipher();
        let analysis = DifferentialAnalysis::new(&cipher);

        // 110 reaches both 010 and 011, so the last position forks
        assert_eq!(analysis.sbox_output_difference(&bits("110000000")),
                   bits("01x000000"));

        assert_eq!(analysis.last_round_input_difference(&bits("001000000")),
                   bits("00100100x"));
    }

    #[test]
    fn subkeys_from_a_single_pair() {
        let cipher = differential_cipher();
        let analysis = DifferentialAnalysis::new(&cipher);

        // Last round S-box inputs 010 and 100 differ by 110 and map to
        // outputs 011 and 000. With subkey chunk 101 the first ciphertext
        // block is 011 ^ 101 = 110 and the second 000 ^ 101 = 101.
        let last_round_difference = bits("110000000");
        let ciphertexts = (bits("110000000"), bits("101000000"));

        let subkeys = analysis.pair_subkeys(&last_round_difference, &ciphertexts);

        assert_eq!(subkeys.len(), 1);

        let candidates = &subkeys[&0];
        assert_eq!(candidates.len(), 4);

        for value in &["101", "100", "111", "110"] {
            assert!(candidates.contains(&bits(value)));
        }
    }

    #[test]
    fn narrowing_is_monotone() {
        let cipher = differential_cipher();
        let analysis = DifferentialAnalysis::new(&cipher);
        let mut rng = StdRng::seed_from_u64(11);

        let key = bits("110101001");
        let input_difference = bits("110000000");
        let last_round_difference = analysis.last_round_input_difference(&input_difference);
        let pairs = analysis.generate_text_pairs(16, &key, &input_difference, &mut rng);

        let mut subkeys = SubkeyCandidates::default();
        let mut sizes: FnvHashMap<usize, usize> = FnvHashMap::default();

        for pair in &pairs {
            let partial = analysis.pair_subkeys(&last_round_difference, &pair.ciphertexts);
            intersect_subkeys(&mut subkeys, partial);

            for (block, candidates) in &subkeys {
                let previous = sizes.insert(*block, candidates.len());

                if let Some(previous) = previous {
                    assert!(candidates.len() <= previous);
                }
            }
        }
    }

    #[test]
    fn surviving_candidates_contain_the_subkey() {
        let cipher = differential_cipher();
        let analysis = DifferentialAnalysis::new(&cipher);
        let mut rng = StdRng::seed_from_u64(23);

        let key = bits("110101001");
        let key_blocks = key.split(3);

        let subkeys = analysis.analyze_input_differences(&[bits("001000000")], 20, &key,
                                                         &mut rng);

        // The propagated difference is nonzero in the first two blocks on
        // every path, so both are always analysed
        assert!(subkeys.contains_key(&0));
        assert!(subkeys.contains_key(&1));

        for (block, candidates) in &subkeys {
            assert!(!candidates.is_empty());
            assert!(candidates.contains(&key_blocks[*block]));
        }
    }
}
