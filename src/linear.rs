use fnv::FnvHashSet;
use indexmap::IndexMap;
use rand::Rng;
use smallvec::SmallVec;

use crate::block::BitString;
use crate::cipher::SpnCipher;
use crate::equation::{ElementKind, EquationElement, Fraction, LinearApproximation};

/* Linear cryptanalysis of the network. Builds one approximation per active
 * S-box per round from the LAT, chains them into a single relation over
 * plaintext, ciphertext and key bits, and estimates key bit parities from
 * sampled text pairs.
 *
 * cipher   The cipher under analysis.
 */
pub struct LinearAnalysis<'a> {
    cipher: &'a SpnCipher,
}

impl<'a> LinearAnalysis<'a> {
    pub fn new(cipher: &SpnCipher) -> LinearAnalysis {
        LinearAnalysis { cipher }
    }

    /* Builds the multi round approximation for one input mask. Fails if no
     * round ends up with exactly one approximation to anchor the chain on.
     *
     * input_mask   The input mask of the first round.
     */
    pub fn spn_approximation(&self, input_mask: &BitString)
                             -> Result<LinearApproximation, String> {
        let params = &self.cipher.params;

        assert_eq!(input_mask.width(), params.block_size, "invalid input mask width");
        assert!(input_mask.num_wild() == 0, "input mask contains unresolved positions");

        let mut rounds_map: IndexMap<usize, Vec<LinearApproximation>> = IndexMap::new();
        let mut round_inputs = input_mask.split(params.sbox_size);

        for round in 1..=params.rounds {
            let (approximations, round_outputs) = self.round_approximations(round, &round_inputs);

            if round < params.rounds {
                let block = BitString::concat(&round_outputs).permute(&params.permutation);
                round_inputs = block.split(params.sbox_size);
            }

            let approximations = if round == 1 {
                relabel_first_round(approximations)
            } else {
                let relabeled = self.relabel_intermediate(approximations);

                if round == params.rounds {
                    relabel_last_round(relabeled)
                } else {
                    relabeled
                }
            };

            rounds_map.insert(round, approximations);
        }

        // The chain is resolved outwards from the unique single-approximation round
        let anchor_round = match rounds_map.iter()
                                           .find(|(_, approximations)| approximations.len() == 1) {
            Some((&round, _)) => round,
            None => {
                return Err(format!("cannot build a linear approximation from input mask {}",
                                   input_mask))
            }
        };

        let mut result = rounds_map[&anchor_round][0].clone();
        let mut used: FnvHashSet<(usize, usize)> = FnvHashSet::default();
        used.insert((anchor_round, 0));

        let left_iterations = params.rounds - anchor_round;
        let right_iterations = params.rounds - left_iterations - 1;

        for _ in 0..left_iterations {
            let mut updated_left = vec![];
            let mut replaced = vec![];

            for element in result.left.clone() {
                if !element.is_intermediate() {
                    continue;
                }

                // S-box outputs of round r occur in the inputs of round r+1
                let defining_round = element.round + 1;
                let candidates = match rounds_map.get(&defining_round) {
                    Some(candidates) => candidates,
                    None => continue,
                };

                for (index, approximation) in candidates.iter().enumerate() {
                    if approximation.right.contains(&element)
                        && !used.contains(&(defining_round, index)) {
                        let isolated = approximation.move_to_left(&element);
                        let substituted =
                            LinearApproximation::new(vec![element], vec![], result.probability)
                                .replace_in_left(&isolated);

                        updated_left.extend(substituted.left);
                        used.insert((defining_round, index));
                        replaced.push(element);
                    }
                }
            }

            for element in &result.left {
                if !replaced.contains(element) {
                    updated_left.push(*element);
                }
            }

            result = LinearApproximation::new(updated_left, result.right.clone(),
                                              result.probability);
        }

        for _ in 0..right_iterations {
            let mut updated_right = vec![];
            let mut replaced = vec![];

            for element in result.right.clone() {
                if !element.is_intermediate() {
                    continue;
                }

                let defining_round = element.round;
                let candidates = match rounds_map.get(&defining_round) {
                    Some(candidates) => candidates,
                    None => continue,
                };

                for (index, approximation) in candidates.iter().enumerate() {
                    if approximation.left.contains(&element)
                        && !used.contains(&(defining_round, index)) {
                        let isolated = approximation.move_to_left(&element);
                        let substituted =
                            LinearApproximation::new(vec![element], vec![], result.probability)
                                .replace_in_left(&isolated);

                        updated_right.extend(substituted.left);
                        used.insert((defining_round, index));
                        replaced.push(element);
                    }
                }
            }

            for element in &result.right {
                if !replaced.contains(element) {
                    updated_right.push(*element);
                }
            }

            result = LinearApproximation::new(result.left.clone(), updated_right,
                                              result.probability);
        }

        let probability = chain_probability(&rounds_map);
        let result = result.simplify().to_standard_form();

        Ok(LinearApproximation::new(result.left, result.right, probability))
    }

    /* Builds the approximations for all input masks, reporting the first
     * failure.
     */
    pub fn spn_approximations(&self, input_masks: &[BitString])
                              -> Result<Vec<LinearApproximation>, String> {
        input_masks.iter()
                   .map(|input_mask| self.spn_approximation(input_mask))
                   .collect()
    }

    /* Builds one approximation per active S-box of a round from the LAT and
     * collects the chosen output mask chunks.
     *
     * round            The round number, starting at 1.
     * round_inputs     The input mask chunks of the round.
     */
    fn round_approximations(&self,
                            round: usize,
                            round_inputs: &[BitString])
                            -> (Vec<LinearApproximation>, SmallVec<[BitString; 8]>) {
        let sbox = &self.cipher.sbox;
        let sbox_size = self.cipher.params.sbox_size;
        let full_count = 1usize << sbox_size;

        let mut approximations = vec![];
        let mut round_outputs = SmallVec::new();

        for (sbox_index, round_input) in round_inputs.iter().enumerate() {
            if round_input.is_zero() {
                round_outputs.push(BitString::zero(sbox_size));
                continue;
            }

            let row = round_input.value() as usize - 1;
            let column = table_column(&sbox.lat[row], full_count);
            let sbox_output = BitString::from_value(column as u64 + 1, sbox_size);

            let left = approximation_part(round, sbox_index, &sbox_output,
                                          ElementKind::SboxOutput, sbox_size);
            let right = approximation_part(round, sbox_index, round_input,
                                           ElementKind::SboxInput, sbox_size);
            let probability = Fraction::new(sbox.lat[row][column] as i64, full_count as i64);

            round_outputs.push(sbox_output);
            approximations.push(LinearApproximation::new(left, right, probability));
        }

        (approximations, round_outputs)
    }

    /* Rewrites the S-box inputs of an intermediate round as the permuted
     * S-box outputs of the previous round plus the key bits mixed in
     * between.
     */
    fn relabel_intermediate(&self, approximations: Vec<LinearApproximation>)
                            -> Vec<LinearApproximation> {
        let permutation = &self.cipher.params.permutation;

        approximations.into_iter()
            .map(|approximation| {
                let right = approximation.right
                    .iter()
                    .flat_map(|term| {
                        vec![EquationElement::sbox_output(term.round - 1,
                                                          permutation[term.bit - 1] + 1),
                             EquationElement::key(term.bit)]
                    })
                    .collect();

                LinearApproximation::new(approximation.left, right, approximation.probability)
            })
            .collect()
    }

    /* Samples plaintext/ciphertext pairs from the cipher under a fixed key.
     *
     * count    Number of pairs to sample.
     * key      The cipher key.
     */
    pub fn generate_text_pairs<R: Rng>(&self,
                                       count: usize,
                                       key: &BitString,
                                       rng: &mut R)
                                       -> Vec<(BitString, BitString)> {
        (0..count)
            .map(|_| {
                let plaintext = BitString::random(self.cipher.params.block_size, rng);
                let ciphertext = self.cipher.encrypt(&plaintext, key);

                (plaintext, ciphertext)
            })
            .collect()
    }

    /* Fraction of the sampled pairs on which the left hand side of an
     * approximation evaluates to one.
     */
    pub fn left_part_stats(&self,
                           approximation: &LinearApproximation,
                           pairs: &[(BitString, BitString)])
                           -> f64 {
        let mut ones = 0;

        for (plaintext, ciphertext) in pairs {
            let mut value = 0;

            for term in &approximation.left {
                let block = if term.kind == ElementKind::Ciphertext {
                    ciphertext
                } else {
                    plaintext
                };

                value ^= block.bit(term.bit - 1).expect("sampled texts are fully resolved");
            }

            if value == 1 {
                ones += 1;
            }
        }

        ones as f64 / pairs.len() as f64
    }

    /* Derives one key bit parity equation per approximation: the majority
     * value of the left hand side over the sampled pairs reveals the right
     * hand side, flipped when the approximation holds less often than not.
     */
    pub fn key_equations(&self,
                         approximations: &[LinearApproximation],
                         pairs: &[(BitString, BitString)])
                         -> Vec<LinearApproximation> {
        approximations.iter()
            .map(|approximation| {
                let left_decision = (self.left_part_stats(approximation, pairs) > 0.5) as u64;
                let right_decision = right_part_decision(approximation, left_decision);

                LinearApproximation::new(approximation.right.clone(),
                                         vec![EquationElement::constant(right_decision)],
                                         approximation.probability)
            })
            .collect()
    }
}

/* Rewrites the S-box inputs of the first round as plaintext bits plus the
 * key bits mixed in before the substitution.
 */
fn relabel_first_round(approximations: Vec<LinearApproximation>) -> Vec<LinearApproximation> {
    approximations.into_iter()
        .map(|approximation| {
            let right = approximation.right
                .iter()
                .flat_map(|term| {
                    vec![EquationElement::plaintext(term.bit), EquationElement::key(term.bit)]
                })
                .collect();

            LinearApproximation::new(approximation.left, right, approximation.probability)
        })
        .collect()
}

/* Rewrites the S-box outputs of the last round as ciphertext bits plus the
 * key bits of the final whitening.
 */
fn relabel_last_round(approximations: Vec<LinearApproximation>) -> Vec<LinearApproximation> {
    approximations.into_iter()
        .map(|approximation| {
            let left = approximation.left
                .iter()
                .flat_map(|term| {
                    vec![EquationElement::ciphertext(term.bit), EquationElement::key(term.bit)]
                })
                .collect();

            LinearApproximation::new(left, approximation.right, approximation.probability)
        })
        .collect()
}

/* The nonzero bits of a mask chunk as equation terms.
 *
 * round        The round the terms belong to.
 * sbox_index   Position of the S-box within the substitution layer.
 * value        The mask chunk.
 * kind         SboxInput or SboxOutput.
 * sbox_size    Size of the S-box input in bits.
 */
fn approximation_part(round: usize,
                      sbox_index: usize,
                      value: &BitString,
                      kind: ElementKind,
                      sbox_size: usize)
                      -> Vec<EquationElement> {
    (0..value.width())
        .filter(|&position| value.bit(position) == Some(1))
        .map(|position| {
            let bit = sbox_index * sbox_size + position + 1;

            match kind {
                ElementKind::SboxInput => EquationElement::sbox_input(round, bit),
                _ => EquationElement::sbox_output(round, bit),
            }
        })
        .collect()
}

/* Combines the probabilities of all round approximations with the Piling-Up
 * Lemma: 1/2 + 2^(n-1) * prod(p_i - 1/2).
 */
fn chain_probability(rounds_map: &IndexMap<usize, Vec<LinearApproximation>>) -> Fraction {
    let count: usize = rounds_map.values().map(|approximations| approximations.len()).sum();
    let mut probability = Fraction::from_integer(1i64 << (count - 1));

    for approximation in rounds_map.values().flatten() {
        probability = probability * (approximation.probability - Fraction::new(1, 2));
    }

    Fraction::new(1, 2) + probability
}

/* Deterministic column choice for a table row: a zero entry (an impossible
 * transition) wins, then a full count entry (a certain transition),
 * otherwise the minimising column. The first index wins ties.
 */
fn table_column(row: &[usize], full_count: usize) -> usize {
    let min_index = index_of_min(row);

    if row[min_index] == 0 {
        return min_index;
    }

    let max_index = index_of_max(row);

    if row[max_index] == full_count {
        return max_index;
    }

    min_index
}

fn index_of_min(row: &[usize]) -> usize {
    let mut index = 0;

    for i in 1..row.len() {
        if row[i] < row[index] {
            index = i;
        }
    }

    index
}

fn index_of_max(row: &[usize]) -> usize {
    let mut index = 0;

    for i in 1..row.len() {
        if row[i] > row[index] {
            index = i;
        }
    }

    index
}

fn right_part_decision(approximation: &LinearApproximation, left_decision: u64) -> u64 {
    if approximation.probability > Fraction::new(1, 2) {
        left_decision
    } else {
        left_decision ^ 1
    }
}

#[cfg(test)]
mod tests {
    use crate::cipher::{Sbox, SpnCipher, LINEAR_SBOX, STANDARD_SPN};

    use super::*;

    fn linear_cipher() -> SpnCipher {
        SpnCipher::new(STANDARD_SPN.clone(), Sbox::new(3, LINEAR_SBOX.to_vec()))
    }

    fn bits(s: &str) -> BitString {
        s.parse().unwrap()
    }

    #[test]
    fn column_choice_prefers_extremes() {
        // A zero entry wins
        assert_eq!(table_column(&[3, 0, 5], 8), 1);
        // Otherwise a full count entry wins
        assert_eq!(table_column(&[4, 8, 2], 8), 1);
        // Otherwise the first minimising column
        assert_eq!(table_column(&[4, 2, 6, 2], 8), 1);
        // A zero entry beats a full count
        assert_eq!(table_column(&[8, 0, 4], 8), 1);
    }

    #[test]
    fn piling_up_single_approximation() {
        let probability = Fraction::new(6, 8);
        let mut rounds_map = IndexMap::new();
        rounds_map.insert(1, vec![LinearApproximation::new(vec![], vec![], probability)]);

        // With a single approximation no adjustment takes place
        assert_eq!(chain_probability(&rounds_map), probability);
    }

    #[test]
    fn piling_up_several_approximations() {
        let mut rounds_map = IndexMap::new();
        rounds_map.insert(1, vec![
            LinearApproximation::new(vec![], vec![], Fraction::from_integer(1)),
        ]);
        rounds_map.insert(2, vec![
            LinearApproximation::new(vec![], vec![], Fraction::new(1, 4)),
            LinearApproximation::new(vec![], vec![], Fraction::new(1, 4)),
        ]);

        // 1/2 + 2^2 * (1/2) * (-1/4) * (-1/4) = 5/8
        assert_eq!(chain_probability(&rounds_map), Fraction::new(5, 8));
    }

    #[test]
    fn known_approximation_chain() {
        let cipher = linear_cipher();
        let analysis = LinearAnalysis::new(&cipher);

        let approximation = analysis.spn_approximation(&bits("000110000")).unwrap();

        assert_eq!(approximation.left,
                   vec![EquationElement::plaintext(4),
                        EquationElement::ciphertext(4),
                        EquationElement::plaintext(5),
                        EquationElement::ciphertext(5)]);
        assert_eq!(approximation.right,
                   vec![EquationElement::key(2), EquationElement::key(4)]);
        assert_eq!(approximation.probability, Fraction::new(5, 8));
    }

    #[test]
    fn all_scenario_masks_resolve() {
        let cipher = linear_cipher();
        let analysis = LinearAnalysis::new(&cipher);

        let masks = ["000110000", "000010000", "000000110", "000000100",
                     "100000100", "110000000", "111000000", "000111000"];

        for mask in &masks {
            let approximation = analysis.spn_approximation(&bits(mask)).unwrap();

            assert!(!approximation.left.is_empty());
            assert!(approximation.left.iter().all(|term| term.is_text()));
            assert!(approximation.right.iter().all(|term| term.kind == ElementKind::Key));
        }
    }

    #[test]
    fn unanchored_mask_is_rejected() {
        let cipher = linear_cipher();
        let analysis = LinearAnalysis::new(&cipher);

        // Two active S-boxes in every round, so no round anchors the chain
        assert!(analysis.spn_approximation(&bits("110110000")).is_err());
    }

    #[test]
    fn key_equation_decision() {
        let cipher = linear_cipher();
        let analysis = LinearAnalysis::new(&cipher);

        let pairs = vec![(bits("100000000"), bits("000000000"))];

        // The left side X(1) evaluates to one on every pair
        let likely = LinearApproximation::new(vec![EquationElement::plaintext(1)],
                                              vec![EquationElement::key(1)],
                                              Fraction::new(3, 4));
        let unlikely = LinearApproximation::new(vec![EquationElement::plaintext(1)],
                                                vec![EquationElement::key(1)],
                                                Fraction::new(1, 4));

        let equations = analysis.key_equations(&[likely, unlikely], &pairs);

        assert_eq!(equations[0].left, vec![EquationElement::key(1)]);
        assert_eq!(equations[0].right, vec![EquationElement::constant(1)]);
        assert_eq!(equations[1].right, vec![EquationElement::constant(0)]);
    }

    #[test]
    fn left_part_statistics() {
        let cipher = linear_cipher();
        let analysis = LinearAnalysis::new(&cipher);

        let approximation = LinearApproximation::new(
            vec![EquationElement::plaintext(1), EquationElement::ciphertext(9)],
            vec![],
            Fraction::new(1, 2),
        );

        let pairs = vec![
            (bits("100000000"), bits("000000000")),
            (bits("100000000"), bits("000000001")),
            (bits("000000000"), bits("000000000")),
            (bits("000000000"), bits("000000001")),
        ];

        assert_eq!(analysis.left_part_stats(&approximation, &pairs), 0.5);
    }
}
