mod block;
mod cipher;
mod differential;
mod equation;
mod linear;
mod options;
mod utility;

use std::process;

use itertools::Itertools;
use structopt::StructOpt;

use crate::block::BitString;
use crate::cipher::{Sbox, SpnCipher, DIFFERENTIAL_SBOX, LINEAR_SBOX, STANDARD_SPN};
use crate::differential::DifferentialAnalysis;
use crate::linear::LinearAnalysis;
use crate::options::CliArgs;

/* The key of the sampling oracle when none is given. */
const DEFAULT_KEY: &str = "110101001";

/* Input masks tried by the linear scenario when none are given. */
const LINEAR_INPUTS: &str = "000110000,000010000,000000110,000000100,\
                             100000100,110000000,111000000,000111000";

/* Input differences tried by the differential scenario when none are given. */
const DIFFERENTIAL_INPUTS: &str = "110000000,000110000,000000110";

fn exit_with(reason: &str) -> ! {
    eprintln!("{}", reason);
    process::exit(1);
}

fn parse_inputs(inputs: &str, width: usize) -> Result<Vec<BitString>, String> {
    inputs.split(',')
          .map(|input| {
              let block: BitString = input.trim().parse()?;

              if block.width() != width {
                  return Err(format!("input {} must be {} bits wide", input.trim(), width));
              }

              Ok(block)
          })
          .collect()
}

fn load_sbox(path: &Option<String>, default_table: &[u8]) -> Sbox {
    match path {
        Some(path) => match Sbox::from_file(path, STANDARD_SPN.sbox_size) {
            Ok(sbox) => sbox,
            Err(reason) => exit_with(&format!("Could not load S-box: {}", reason)),
        },
        None => Sbox::new(STANDARD_SPN.sbox_size, default_table.to_vec()),
    }
}

/* Runs the linear analysis scenario: dump the LAT, build one approximation
 * per input mask, sample text pairs and derive the key equations.
 *
 * cipher       The cipher to investigate.
 * input_masks  The first round input masks to try.
 * num_pairs    Number of text pairs to sample.
 * key          The key of the sampling oracle.
 */
fn run_linear(cipher: &SpnCipher,
              input_masks: &[BitString],
              num_pairs: usize,
              key: &BitString) {
    println!("Linear cryptanalysis of a {} bit substitution-permutation network.",
             cipher.params.block_size);
    println!("\tRounds: {}.", cipher.params.rounds);
    println!("\tInput masks: {}.", input_masks.len());
    println!("\tSampling {} text pairs.", num_pairs);

    let start = time::precise_time_s();

    println!("\nLinear approximation table (masks 1 to {}):",
             (1 << cipher.sbox.size) - 1);

    for row in &cipher.sbox.lat {
        println!("{:?}", row);
    }

    let analysis = LinearAnalysis::new(cipher);
    let mut approximations = vec![];

    println!("\nApproximations:");

    for input_mask in input_masks {
        match analysis.spn_approximation(input_mask) {
            Ok(approximation) => {
                println!("\t{}: {}", input_mask, approximation);
                approximations.push(approximation);
            }
            Err(reason) => println!("\t{}: {}", input_mask, reason),
        }
    }

    let mut rng = rand::thread_rng();
    let pairs = analysis.generate_text_pairs(num_pairs, key, &mut rng);

    println!("\nKey: {}", key);
    println!("Sampled pairs (first 5):");

    for (plaintext, ciphertext) in pairs.iter().take(5) {
        println!("\t{} --- {}", plaintext, ciphertext);
    }

    println!("\nKey equations:");

    for equation in analysis.key_equations(&approximations, &pairs) {
        println!("\t{}", equation);
    }

    println!("\nAnalysis finished. [{} s]", time::precise_time_s() - start);
}

/* Runs the differential analysis scenario: dump the DDT, propagate each
 * trial difference to the last round, then narrow the last round subkey
 * from sampled ciphertext pairs.
 *
 * cipher               The cipher to investigate.
 * input_differences    The trial input differences.
 * num_pairs            Number of text pairs to sample per difference.
 * key                  The key of the sampling oracle.
 */
fn run_differential(cipher: &SpnCipher,
                    input_differences: &[BitString],
                    num_pairs: usize,
                    key: &BitString) {
    println!("Differential cryptanalysis of a {} bit substitution-permutation network.",
             cipher.params.block_size);
    println!("\tRounds: {}.", cipher.params.rounds);
    println!("\tInput differences: {}.", input_differences.len());
    println!("\tSampling {} text pairs per difference.", num_pairs);

    let start = time::precise_time_s();

    println!("\nDifference distribution table:");

    for row in &cipher.sbox.ddt {
        println!("{:?}", row);
    }

    let analysis = DifferentialAnalysis::new(cipher);

    println!("\nPropagated differences:");

    for input_difference in input_differences {
        println!("\t{} -> {}",
                 input_difference,
                 analysis.last_round_input_difference(input_difference));

        if input_difference.num_wild() > 0 {
            println!("\tSkipping {} for key recovery: unresolved positions", input_difference);
        }
    }

    let concrete: Vec<BitString> = input_differences.iter()
                                                    .filter(|difference| difference.num_wild() == 0)
                                                    .cloned()
                                                    .collect();

    println!("\nKey: {}", key);
    println!("Narrowing subkey candidates:");

    let mut rng = rand::thread_rng();
    let subkeys = analysis.analyze_input_differences(&concrete, num_pairs, key, &mut rng);

    println!("\n\nSurviving subkey candidates:");

    for block in 0..cipher.params.num_sboxes() {
        match subkeys.get(&block) {
            Some(candidates) => {
                println!("\tS-box block {}: {}",
                         block,
                         candidates.iter().sorted().join(", "));
            }
            None => println!("\tS-box block {}: no information", block),
        }
    }

    println!("\nAnalysis finished. [{} s]", time::precise_time_s() - start);
}

fn main() {
    let options = CliArgs::from_args();
    let params = &*STANDARD_SPN;

    let key = options.key.unwrap_or_else(|| String::from(DEFAULT_KEY));
    let key: BitString = match key.parse() {
        Ok(key) => key,
        Err(reason) => exit_with(&reason),
    };

    if key.width() != params.block_size || key.num_wild() > 0 {
        exit_with(&format!("key must be {} fully determined bits", params.block_size));
    }

    match options.mode.as_ref() {
        "linear" => {
            let sbox = load_sbox(&options.sbox_path, &LINEAR_SBOX);
            let cipher = SpnCipher::new(params.clone(), sbox);

            let inputs = options.inputs.unwrap_or_else(|| String::from(LINEAR_INPUTS));
            let input_masks = match parse_inputs(&inputs, params.block_size) {
                Ok(input_masks) => input_masks,
                Err(reason) => exit_with(&reason),
            };

            run_linear(&cipher, &input_masks, options.num_pairs.unwrap_or(100), &key);
        }
        "differential" => {
            let sbox = load_sbox(&options.sbox_path, &DIFFERENTIAL_SBOX);
            let cipher = SpnCipher::new(params.clone(), sbox);

            let inputs = options.inputs.unwrap_or_else(|| String::from(DIFFERENTIAL_INPUTS));
            let input_differences = match parse_inputs(&inputs, params.block_size) {
                Ok(input_differences) => input_differences,
                Err(reason) => exit_with(&reason),
            };

            run_differential(&cipher, &input_differences, options.num_pairs.unwrap_or(10),
                             &key);
        }
        _ => {
            println!("Mode must be one of: linear, differential");
        }
    }
}
