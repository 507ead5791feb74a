use std::fmt;

use indexmap::IndexMap;
use itertools::Itertools;
use num_rational::Ratio;

/* Probabilities are kept as exact rationals. Chaining many approximations
 * multiplies many small biases, which floating point would round away.
 */
pub type Fraction = Ratio<i64>;

/* The kind of a term appearing in a linear equation over cipher bits. */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementKind {
    Plaintext,
    Ciphertext,
    Key,
    SboxInput,
    SboxOutput,
    Zero,
    One,
}

impl ElementKind {
    fn symbol(&self) -> &'static str {
        match *self {
            ElementKind::Plaintext => "X",
            ElementKind::Ciphertext => "Y",
            ElementKind::Key => "K",
            ElementKind::SboxInput => "U",
            ElementKind::SboxOutput => "V",
            ElementKind::Zero => "0",
            ElementKind::One => "1",
        }
    }
}

/* A single term of a linear equation. Bit positions are numbered from 1
 * starting at the leftmost block bit. S-box input and output terms
 * additionally carry the round they belong to.
 *
 * kind     The kind of the term.
 * round    The round of an S-box term, 0 otherwise.
 * bit      The bit position, 0 for constants.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EquationElement {
    pub kind: ElementKind,
    pub round: usize,
    pub bit: usize,
}

impl EquationElement {
    pub fn plaintext(bit: usize) -> EquationElement {
        EquationElement { kind: ElementKind::Plaintext, round: 0, bit }
    }

    pub fn ciphertext(bit: usize) -> EquationElement {
        EquationElement { kind: ElementKind::Ciphertext, round: 0, bit }
    }

    pub fn key(bit: usize) -> EquationElement {
        EquationElement { kind: ElementKind::Key, round: 0, bit }
    }

    pub fn sbox_input(round: usize, bit: usize) -> EquationElement {
        EquationElement { kind: ElementKind::SboxInput, round, bit }
    }

    pub fn sbox_output(round: usize, bit: usize) -> EquationElement {
        EquationElement { kind: ElementKind::SboxOutput, round, bit }
    }

    pub fn constant(value: u64) -> EquationElement {
        let kind = if value == 0 { ElementKind::Zero } else { ElementKind::One };

        EquationElement { kind, round: 0, bit: 0 }
    }

    /* True for S-box input and output terms, which must be eliminated before
     * an equation relates only plaintext, ciphertext and key bits.
     */
    pub fn is_intermediate(&self) -> bool {
        self.kind == ElementKind::SboxInput || self.kind == ElementKind::SboxOutput
    }

    pub fn is_text(&self) -> bool {
        self.kind == ElementKind::Plaintext || self.kind == ElementKind::Ciphertext
    }
}

impl fmt::Display for EquationElement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            ElementKind::SboxInput | ElementKind::SboxOutput => {
                write!(f, "{}({}, {})", self.kind.symbol(), self.round, self.bit)
            }
            ElementKind::Zero | ElementKind::One => write!(f, "{}", self.kind.symbol()),
            _ => write!(f, "{}({})", self.kind.symbol(), self.bit),
        }
    }
}

/* A linear equation left = right over equation terms, XORed together within
 * each side, holding with the given probability. All transformations are
 * pure and return new equations.
 *
 * left             Terms of the left hand side.
 * right            Terms of the right hand side.
 * probability      The probability that the equation holds.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct LinearApproximation {
    pub left: Vec<EquationElement>,
    pub right: Vec<EquationElement>,
    pub probability: Fraction,
}

impl LinearApproximation {
    pub fn new(left: Vec<EquationElement>,
               right: Vec<EquationElement>,
               probability: Fraction)
               -> LinearApproximation {
        LinearApproximation {
            left,
            right,
            probability,
        }
    }

    /* Isolates the given term: returns the equation whose left side is the
     * term alone and whose right side holds every other term of both sides.
     */
    pub fn move_to_left(&self, element: &EquationElement) -> LinearApproximation {
        let mut right: Vec<EquationElement> =
            self.left.iter().chain(self.right.iter()).cloned().collect();

        if let Some(position) = right.iter().position(|term| term == element) {
            right.remove(position);
        }

        LinearApproximation::new(vec![*element], right, self.probability)
    }

    /* Substitutes an isolated equation into the left side: one occurrence of
     * the replacement's left hand term is replaced by the replacement's
     * right hand side.
     *
     * replacement      An equation whose left side is a single term.
     */
    pub fn replace_in_left(&self, replacement: &LinearApproximation) -> LinearApproximation {
        let target = replacement.left[0];
        let mut left = self.left.clone();

        if let Some(position) = left.iter().position(|term| *term == target) {
            left.remove(position);
        }

        left.extend(replacement.right.iter().cloned());

        LinearApproximation::new(left, self.right.clone(), self.probability)
    }

    /* Moves every term to the left side and cancels terms occurring an even
     * number of times, since a term XORed with itself vanishes. Zero
     * constants are dropped outright.
     */
    pub fn simplify(&self) -> LinearApproximation {
        let mut occurrences: IndexMap<EquationElement, usize> = IndexMap::new();

        for term in self.left.iter().chain(self.right.iter()) {
            if term.kind == ElementKind::Zero {
                continue;
            }

            *occurrences.entry(*term).or_insert(0) += 1;
        }

        let left = occurrences.into_iter()
                              .filter(|&(_, count)| count % 2 == 1)
                              .map(|(term, _)| term)
                              .collect();

        LinearApproximation::new(left, vec![], self.probability)
    }

    /* Partitions a simplified equation into plaintext/ciphertext terms on
     * the left and everything else on the right, both sorted by bit
     * position.
     */
    pub fn to_standard_form(&self) -> LinearApproximation {
        let (mut left, mut right): (Vec<EquationElement>, Vec<EquationElement>) =
            self.left.iter().cloned().partition(|term| term.is_text());

        left.sort_by_key(|term| (term.bit, term.kind, term.round));
        right.sort_by_key(|term| (term.bit, term.kind, term.round));

        LinearApproximation::new(left, right, self.probability)
    }
}

fn part_to_string(part: &[EquationElement]) -> String {
    if part.is_empty() {
        String::from("0")
    } else {
        part.iter().join(" + ")
    }
}

impl fmt::Display for LinearApproximation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f,
               "{} = {} p = {}",
               part_to_string(&self.left),
               part_to_string(&self.right),
               self.probability)
    }
}
