use std::fs::File;
use std::io::{BufRead, BufReader};

use lazy_static::lazy_static;
use smallvec::SmallVec;

use crate::block::BitString;
use crate::utility;

/* Parameters of a substitution-permutation network.
 *
 * block_size              Size of the cipher block in bits.
 * sbox_size               Size of the S-box input in bits.
 * rounds                  Number of rounds.
 * permutation             The bit permutation applied between rounds.
 * inverse_permutation     The inverse of the bit permutation.
 */
#[derive(Clone, Debug)]
pub struct SpnParameters {
    pub block_size: usize,
    pub sbox_size: usize,
    pub rounds: usize,
    pub permutation: Vec<usize>,
    pub inverse_permutation: Vec<usize>,
}

impl SpnParameters {
    pub fn new(block_size: usize,
               sbox_size: usize,
               rounds: usize,
               permutation: Vec<usize>)
               -> SpnParameters {
        assert!(sbox_size > 0 && block_size % sbox_size == 0,
                "block size must be a multiple of the S-box size");
        assert!(rounds > 0, "the network must have at least one round");
        assert_eq!(permutation.len(), block_size,
                   "permutation length must equal the block size");

        let mut inverse_permutation = vec![block_size; block_size];

        for (position, &target) in permutation.iter().enumerate() {
            assert!(target < block_size && inverse_permutation[target] == block_size,
                    "invalid bit permutation");
            inverse_permutation[target] = position;
        }

        SpnParameters {
            block_size,
            sbox_size,
            rounds,
            permutation,
            inverse_permutation,
        }
    }

    /* Returns the number of S-boxes in the substitution layer. */
    pub fn num_sboxes(&self) -> usize {
        self.block_size / self.sbox_size
    }
}

lazy_static! {
    /* The three round network analysed by the command line scenarios. */
    pub static ref STANDARD_SPN: SpnParameters =
        SpnParameters::new(9, 3, 3, vec![0, 3, 6, 1, 4, 7, 2, 5, 8]);
}

/* The S-box used by the linear analysis scenario. */
pub const LINEAR_SBOX: [u8; 8] = [6, 7, 4, 3, 2, 5, 1, 0];

/* The S-box used by the differential analysis scenario. */
pub const DIFFERENTIAL_SBOX: [u8; 8] = [7, 6, 3, 2, 0, 1, 5, 4];

/* A structure that represents a bijective S-box, together with its linear
 * approximation and difference distribution tables.
 *
 * size     Size of the S-box input in number of bits.
 * table    The forward lookup table.
 * itable   The inverse lookup table.
 * lat      The linear approximation table, indexed by mask value minus one.
 * ddt      The difference distribution table, indexed by difference value.
 */
#[derive(Clone, Debug)]
pub struct Sbox {
    pub size: usize,
    pub table: Vec<u8>,
    pub itable: Vec<u8>,
    pub lat: Vec<Vec<usize>>,
    pub ddt: Vec<Vec<usize>>,
}

impl Sbox {
    /* Generates a new S-box from a table. The table is assumed to describe
     * a bijection.
     *
     * size     Size of the S-box input in number of bits.
     * table    A table describing the S-box transformation.
     */
    pub fn new(size: usize, table: Vec<u8>) -> Sbox {
        assert_eq!(table.len(), 1 << size, "table length must match the S-box size");

        let mut itable = vec![0; table.len()];

        for (input, &output) in table.iter().enumerate() {
            itable[output as usize] = input as u8;
        }

        let lat = Sbox::generate_lat(&table, size);
        let ddt = Sbox::generate_ddt(&table, size);

        Sbox {
            size,
            table,
            itable,
            lat,
            ddt,
        }
    }

    /* Reads an S-box from a file with one decimal (input, output) pair per
     * line. The load fails unless every input is mapped exactly once.
     *
     * path     Path of the file to read.
     * size     Size of the S-box input in number of bits.
     */
    pub fn from_file(path: &str, size: usize) -> Result<Sbox, String> {
        let file = File::open(path)
            .map_err(|reason| format!("could not open S-box file {}: {}", path, reason))?;

        let entries = 1usize << size;
        let mut table = vec![None; entries];

        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line
                .map_err(|reason| format!("could not read S-box file {}: {}", path, reason))?;

            if line.trim().is_empty() {
                continue;
            }

            let mut fields = line.split_whitespace();
            let input = fields.next()
                .ok_or_else(|| format!("line {}: missing input value", number + 1))?;
            let output = fields.next()
                .ok_or_else(|| format!("line {}: missing output value", number + 1))?;

            if fields.next().is_some() {
                return Err(format!("line {}: expected two values", number + 1));
            }

            let input: usize = input.parse()
                .map_err(|_| format!("line {}: invalid input value '{}'", number + 1, input))?;
            let output: usize = output.parse()
                .map_err(|_| format!("line {}: invalid output value '{}'", number + 1, output))?;

            if input >= entries || output >= entries {
                return Err(format!("line {}: value outside [0, {}]", number + 1, entries - 1));
            }

            if table[input].is_some() {
                return Err(format!("line {}: duplicate mapping for input {}", number + 1, input));
            }

            table[input] = Some(output as u8);
        }

        let table = table.into_iter()
                         .enumerate()
                         .map(|(input, output)| {
                             output.ok_or_else(|| format!("no mapping for input {}", input))
                         })
                         .collect::<Result<Vec<u8>, String>>()?;

        Ok(Sbox::new(size, table))
    }

    /* Generates the LAT associated with the S-box. Rows and columns are
     * indexed by mask value minus one, since the zero masks carry no
     * information.
     */
    fn generate_lat(table: &[u8], size: usize) -> Vec<Vec<usize>> {
        let entries = 1 << size;
        let mut lat = vec![vec![0; entries - 1]; entries - 1];

        for alpha in 1..entries {
            for beta in 1..entries {
                for input in 0..entries {
                    let output = table[input] as u64;
                    let parity = utility::parity_masks(input as u64,
                                                       output,
                                                       alpha as u64,
                                                       beta as u64);

                    lat[alpha - 1][beta - 1] += (1 - parity) as usize;
                }
            }
        }

        lat
    }

    /* Generates the DDT associated with the S-box. */
    fn generate_ddt(table: &[u8], size: usize) -> Vec<Vec<usize>> {
        let entries = 1 << size;
        let mut ddt = vec![vec![0; entries]; entries];

        for input_0 in 0..entries {
            let output_0 = table[input_0];

            for in_diff in 0..entries {
                let input_1 = input_0 ^ in_diff;
                let output_1 = table[input_1];

                ddt[in_diff][(output_0 ^ output_1) as usize] += 1;
            }
        }

        ddt
    }

    pub fn lookup(&self, input: u64) -> u64 {
        self.table[input as usize] as u64
    }

    pub fn lookup_inv(&self, output: u64) -> u64 {
        self.itable[output as usize] as u64
    }

    /* All output differences reachable from the given input difference. */
    pub fn output_differences(&self, input_difference: &BitString) -> Vec<BitString> {
        self.ddt[input_difference.value() as usize]
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count != 0)
            .map(|(column, _)| BitString::from_value(column as u64, self.size))
            .collect()
    }

    /* All input differences that can produce the given output difference. */
    pub fn input_differences(&self, output_difference: &BitString) -> Vec<BitString> {
        let column = output_difference.value() as usize;

        self.ddt
            .iter()
            .enumerate()
            .filter(|&(_, row)| row[column] != 0)
            .map(|(row, _)| BitString::from_value(row as u64, self.size))
            .collect()
    }
}

/* An instance of the network. The same key is mixed in before every
 * substitution layer and once more after the last round; the bit permutation
 * is skipped in the last round.
 *
 * params   The network parameters.
 * sbox     The S-box of the substitution layer.
 */
#[derive(Clone, Debug)]
pub struct SpnCipher {
    pub params: SpnParameters,
    pub sbox: Sbox,
}

impl SpnCipher {
    pub fn new(params: SpnParameters, sbox: Sbox) -> SpnCipher {
        assert_eq!(params.sbox_size, sbox.size,
                   "S-box size differs from the network parameters");

        SpnCipher { params, sbox }
    }

    /* Applies the substitution layer. */
    fn substitute(&self, block: &BitString) -> BitString {
        let chunks: SmallVec<[BitString; 8]> =
            block.split(self.params.sbox_size)
                 .iter()
                 .map(|chunk| {
                     BitString::from_value(self.sbox.lookup(chunk.value()),
                                           self.params.sbox_size)
                 })
                 .collect();

        BitString::concat(&chunks)
    }

    /* Applies the inverse substitution layer. */
    fn substitute_inv(&self, block: &BitString) -> BitString {
        let chunks: SmallVec<[BitString; 8]> =
            block.split(self.params.sbox_size)
                 .iter()
                 .map(|chunk| {
                     BitString::from_value(self.sbox.lookup_inv(chunk.value()),
                                           self.params.sbox_size)
                 })
                 .collect();

        BitString::concat(&chunks)
    }

    /* Performs encryption.
     *
     * plaintext    Plaintext to be encrypted.
     * key          The cipher key.
     */
    pub fn encrypt(&self, plaintext: &BitString, key: &BitString) -> BitString {
        assert_eq!(plaintext.width(), self.params.block_size, "invalid plaintext width");
        assert_eq!(key.width(), self.params.block_size, "invalid key width");

        let mut block = *plaintext;

        for round in 0..self.params.rounds {
            block = self.substitute(&block.xor(key));

            if round + 1 < self.params.rounds {
                block = block.permute(&self.params.permutation);
            }
        }

        block.xor(key)
    }

    /* Performs decryption.
     *
     * ciphertext   Ciphertext to be decrypted.
     * key          The cipher key.
     */
    pub fn decrypt(&self, ciphertext: &BitString, key: &BitString) -> BitString {
        assert_eq!(ciphertext.width(), self.params.block_size, "invalid ciphertext width");
        assert_eq!(key.width(), self.params.block_size, "invalid key width");

        let mut block = ciphertext.xor(key);

        for round in 0..self.params.rounds {
            block = self.substitute_inv(&block).xor(key);

            if round + 1 < self.params.rounds {
                block = block.permute(&self.params.inverse_permutation);
            }
        }

        block
    }
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;

    use quickcheck_macros::quickcheck;

    use super::*;

    fn standard_cipher(table: [u8; 8]) -> SpnCipher {
        SpnCipher::new(STANDARD_SPN.clone(), Sbox::new(3, table.to_vec()))
    }

    #[test]
    fn ddt_row_sums() {
        for table in &[LINEAR_SBOX, DIFFERENTIAL_SBOX] {
            let sbox = Sbox::new(3, table.to_vec());

            for row in &sbox.ddt {
                assert_eq!(row.iter().sum::<usize>(), 8);
            }
        }
    }

    #[test]
    fn ddt_known_transitions() {
        let sbox = Sbox::new(3, DIFFERENTIAL_SBOX.to_vec());

        assert_eq!(sbox.ddt[0][0], 8);
        assert_eq!(sbox.ddt[1][1], 8);
        assert_eq!(sbox.ddt[6][2], 4);
        assert_eq!(sbox.ddt[6][3], 4);
    }

    #[test]
    fn lat_matches_naive_count() {
        let sbox = Sbox::new(3, LINEAR_SBOX.to_vec());

        for alpha in 1..8u64 {
            for beta in 1..8u64 {
                let mut matches = 0;

                for input in 0..8u64 {
                    let input_parity = (input & alpha).count_ones() % 2;
                    let output_parity = (sbox.lookup(input) & beta).count_ones() % 2;

                    if input_parity == output_parity {
                        matches += 1;
                    }
                }

                assert!(matches <= 8);
                assert_eq!(sbox.lat[alpha as usize - 1][beta as usize - 1], matches);
            }
        }
    }

    #[test]
    fn lat_known_entries() {
        let sbox = Sbox::new(3, LINEAR_SBOX.to_vec());

        // Mask pair (110, 110) always agrees for this S-box
        assert_eq!(sbox.lat[5][5], 8);
        assert_eq!(sbox.lat[5][0], 4);
    }

    #[test]
    fn difference_queries() {
        let sbox = Sbox::new(3, DIFFERENTIAL_SBOX.to_vec());

        let outputs = sbox.output_differences(&"110".parse().unwrap());
        assert_eq!(outputs, vec!["010".parse().unwrap(), "011".parse().unwrap()]);

        let inputs = sbox.input_differences(&"001".parse().unwrap());
        assert_eq!(inputs, vec!["001".parse().unwrap()]);
    }

    #[test]
    fn inverse_lookup() {
        let sbox = Sbox::new(3, LINEAR_SBOX.to_vec());

        for input in 0..8 {
            assert_eq!(sbox.lookup_inv(sbox.lookup(input)), input);
        }
    }

    #[test]
    fn encryption_decryption_regression() {
        let cipher = standard_cipher(DIFFERENTIAL_SBOX);
        let key = "110101001".parse().unwrap();
        let plaintext: BitString = "101001111".parse().unwrap();
        let ciphertext = cipher.encrypt(&plaintext, &key);

        assert_eq!(cipher.decrypt(&ciphertext, &key), plaintext);
    }

    #[quickcheck]
    fn encryption_decryption(plaintext: u16, key: u16) -> bool {
        let cipher = standard_cipher(LINEAR_SBOX);
        let plaintext = BitString::from_value(plaintext as u64 & 0x1ff, 9);
        let key = BitString::from_value(key as u64 & 0x1ff, 9);

        cipher.decrypt(&cipher.encrypt(&plaintext, &key), &key) == plaintext
    }

    #[test]
    fn sbox_file_loading() {
        let path = env::temp_dir().join("sbox_load_test.txt");
        let mut contents = String::new();

        for (input, output) in DIFFERENTIAL_SBOX.iter().enumerate() {
            contents.push_str(&format!("{} {}\n", input, output));
        }

        fs::write(&path, contents).unwrap();

        let sbox = Sbox::from_file(path.to_str().unwrap(), 3).unwrap();
        assert_eq!(sbox.table, DIFFERENTIAL_SBOX.to_vec());

        fs::remove_file(&path).ok();
    }

    #[test]
    fn sbox_file_errors() {
        let cases = [
            ("sbox_err_malformed.txt", "0 7\n1 6\nbroken\n"),
            ("sbox_err_range.txt", "0 9\n"),
            ("sbox_err_incomplete.txt", "0 7\n1 6\n"),
            ("sbox_err_duplicate.txt", "0 7\n0 6\n1 5\n2 4\n3 3\n4 2\n5 1\n6 0\n7 7\n"),
            ("sbox_err_extra_column.txt", "0 7 7\n"),
        ];

        for (name, contents) in &cases {
            let path = env::temp_dir().join(name);
            fs::write(&path, contents).unwrap();

            assert!(Sbox::from_file(path.to_str().unwrap(), 3).is_err());

            fs::remove_file(&path).ok();
        }

        assert!(Sbox::from_file("/nonexistent/sbox.txt", 3).is_err());
    }

    #[test]
    #[should_panic]
    fn invalid_permutation() {
        SpnParameters::new(9, 3, 3, vec![0; 9]);
    }
}
