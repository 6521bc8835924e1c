//! Columnar metadata describing every output coefficient.
//!
//! Purpose
//! -------
//! Track the semantic meaning of each slice along the coefficient axis of a
//! statistic tensor. A [`Description`] is an ordered collection of
//! [`CoeffRow`] records; rows of heterogeneous coefficient kinds coexist in
//! one table, with fields that do not apply to a kind left as `None`
//! (defined-ness is explicit, never implied by absence).
//!
//! Key behaviors
//! -------------
//! - [`RowFilter`] builds column=value queries where every column accepts a
//!   scalar or a set of admissible values; a constrained column only matches
//!   rows where the field is defined.
//! - [`Description::mask`] / [`Description::index_where`] /
//!   [`Description::count`] answer queries without touching any tensor.
//! - [`Description::sorted`] produces the canonical row order together with
//!   the permutation applied, so a paired tensor can be reordered
//!   consistently.
//!
//! Invariants & assumptions
//! ------------------------
//! - Row order is meaningful: it mirrors the coefficient axis of the paired
//!   tensor at all times.
//! - Moment exponents `q` are finite (validated at configuration time), so
//!   the canonical total order over rows is well defined.
use std::str::FromStr;

/// Semantic category of a statistic coefficient.
///
/// Parsed case-insensitively from text for user-facing selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CType {
    /// Low-pass average `E{Wx}`.
    Mean,
    /// Sparsity marginal `E{|Wx|}`.
    Spars,
    /// Wavelet power spectrum `E{|Wx|^2}` (diagonal covariance).
    Ps,
    /// Phase-modulus cross-covariance `E{Wx conj(W|Wx|)}`.
    PhaseEnv,
    /// Envelope cross-covariance `E{W|Wx| conj(W|Wx|)}`.
    Envelope,
    /// Marginal scattering moment `E{|Sx|^q}`.
    Scat,
    /// Time-resolved raw scattering coefficient.
    Raw,
}

impl FromStr for CType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mean" => Ok(CType::Mean),
            "spars" => Ok(CType::Spars),
            "ps" => Ok(CType::Ps),
            "phaseenv" => Ok(CType::PhaseEnv),
            "envelope" => Ok(CType::Envelope),
            "scat" => Ok(CType::Scat),
            "raw" | "none" => Ok(CType::Raw),
            _ => Err(format!("Unknown coefficient type '{s}'")),
        }
    }
}

impl std::fmt::Display for CType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CType::Mean => "mean",
            CType::Spars => "spars",
            CType::Ps => "ps",
            CType::PhaseEnv => "phaseenv",
            CType::Envelope => "envelope",
            CType::Scat => "scat",
            CType::Raw => "raw",
        };
        write!(f, "{name}")
    }
}

/// One wide record per output coefficient; `None` marks fields that are not
/// applicable for the row's kind.
///
/// Field conventions:
/// - `nl`/`nr`: left/right channel.
/// - `scl`/`scr`: left/right global scale-path indices.
/// - `jl1`/`jr1`/`j2`: per-layer scale labels (left first, right first,
///   shared second).
/// - `rl`/`rr`: left/right scattering orders.
/// - `q`: marginal moment exponent.
/// - `a` (>= 0) and `b` (< 0): scale-invariant reduction offsets.
/// - `real`: the coefficient is real-valued by construction.
/// - `low`: the coefficient involves a low-pass terminal.
/// - `loss_tag`: deglitching loss-term block the row belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct CoeffRow {
    pub c_type: CType,
    pub nl: Option<usize>,
    pub nr: Option<usize>,
    pub rl: Option<usize>,
    pub rr: Option<usize>,
    pub scl: Option<usize>,
    pub scr: Option<usize>,
    pub jl1: Option<usize>,
    pub jr1: Option<usize>,
    pub j2: Option<usize>,
    pub q: Option<f64>,
    pub a: Option<i64>,
    pub b: Option<i64>,
    pub real: Option<bool>,
    pub low: Option<bool>,
    pub loss_tag: Option<u8>,
}

impl Eq for CoeffRow {}

impl CoeffRow {
    /// A row of the given kind with every optional field undefined.
    pub fn new(c_type: CType) -> Self {
        Self {
            c_type,
            nl: None,
            nr: None,
            rl: None,
            rr: None,
            scl: None,
            scr: None,
            jl1: None,
            jr1: None,
            j2: None,
            q: None,
            a: None,
            b: None,
            real: None,
            low: None,
            loss_tag: None,
        }
    }

    // Canonical sort key; q is compared via total order (no NaN by
    // construction).
    fn sort_key(&self) -> impl Ord + '_ {
        (
            (
                self.loss_tag,
                self.c_type,
                self.nl,
                self.nr,
                self.rl,
                self.rr,
                self.scl,
                self.scr,
            ),
            (
                self.jl1,
                self.jr1,
                self.j2,
                self.a,
                self.b,
                self.q.map(TotalF64),
                self.real,
                self.low,
            ),
        )
    }
}

impl PartialOrd for CoeffRow {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CoeffRow {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TotalF64(f64);

impl Eq for TotalF64 {}

impl PartialOrd for TotalF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Column=value query over description rows.
///
/// Every setter exists in a scalar form and an `_in` (any-of) form; all
/// given constraints must hold simultaneously. A constraint on a column that
/// is undefined for a row never matches that row, so querying a column
/// absent from every row matches nothing, without error.
#[derive(Debug, Clone, Default)]
pub struct RowFilter {
    c_type: Option<Vec<CType>>,
    nl: Option<Vec<usize>>,
    nr: Option<Vec<usize>>,
    rl: Option<Vec<usize>>,
    rr: Option<Vec<usize>>,
    scl: Option<Vec<usize>>,
    scr: Option<Vec<usize>>,
    jl1: Option<Vec<usize>>,
    jr1: Option<Vec<usize>>,
    j2: Option<Vec<usize>>,
    q: Option<Vec<f64>>,
    a: Option<Vec<i64>>,
    b: Option<Vec<i64>>,
    real: Option<bool>,
    low: Option<bool>,
    loss_tag: Option<Vec<u8>>,
}

macro_rules! filter_setters {
    ($($field:ident : $ty:ty => $scalar:ident, $any:ident;)*) => {
        $(
            pub fn $scalar(mut self, value: $ty) -> Self {
                self.$field = Some(vec![value]);
                self
            }

            pub fn $any(mut self, values: &[$ty]) -> Self {
                self.$field = Some(values.to_vec());
                self
            }
        )*
    };
}

impl RowFilter {
    pub fn new() -> Self {
        Self::default()
    }

    filter_setters! {
        c_type: CType => c_type, c_type_in;
        nl: usize => nl, nl_in;
        nr: usize => nr, nr_in;
        rl: usize => rl, rl_in;
        rr: usize => rr, rr_in;
        scl: usize => scl, scl_in;
        scr: usize => scr, scr_in;
        jl1: usize => jl1, jl1_in;
        jr1: usize => jr1, jr1_in;
        j2: usize => j2, j2_in;
        q: f64 => q, q_in;
        a: i64 => a, a_in;
        b: i64 => b, b_in;
        loss_tag: u8 => loss_tag, loss_tag_in;
    }

    pub fn real(mut self, value: bool) -> Self {
        self.real = Some(value);
        self
    }

    pub fn low(mut self, value: bool) -> Self {
        self.low = Some(value);
        self
    }

    /// Whether a row satisfies every constraint of this filter.
    pub fn matches(&self, row: &CoeffRow) -> bool {
        fn ok<T: PartialEq>(allowed: &Option<Vec<T>>, value: &Option<T>) -> bool {
            match (allowed, value) {
                (None, _) => true,
                (Some(set), Some(v)) => set.contains(v),
                (Some(_), None) => false,
            }
        }
        if let Some(set) = &self.c_type {
            if !set.contains(&row.c_type) {
                return false;
            }
        }
        ok(&self.nl, &row.nl)
            && ok(&self.nr, &row.nr)
            && ok(&self.rl, &row.rl)
            && ok(&self.rr, &row.rr)
            && ok(&self.scl, &row.scl)
            && ok(&self.scr, &row.scr)
            && ok(&self.jl1, &row.jl1)
            && ok(&self.jr1, &row.jr1)
            && ok(&self.j2, &row.j2)
            && ok(&self.q, &row.q)
            && ok(&self.a, &row.a)
            && ok(&self.b, &row.b)
            && self.real.map_or(true, |want| row.real == Some(want))
            && self.low.map_or(true, |want| row.low == Some(want))
            && ok(&self.loss_tag, &row.loss_tag)
    }
}

/// Ordered collection of coefficient rows, mirroring a tensor's coefficient
/// axis.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Description {
    rows: Vec<CoeffRow>,
}

impl Description {
    pub fn new(rows: Vec<CoeffRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[CoeffRow] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CoeffRow> {
        self.rows.iter()
    }

    /// One boolean per row: whether it matches the filter.
    pub fn mask(&self, filter: &RowFilter) -> Vec<bool> {
        self.rows.iter().map(|row| filter.matches(row)).collect()
    }

    /// Positions of the rows matching the filter, in row order.
    pub fn index_where(&self, filter: &RowFilter) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| filter.matches(row).then_some(i))
            .collect()
    }

    /// Number of rows matching the filter.
    pub fn count(&self, filter: &RowFilter) -> usize {
        self.rows.iter().filter(|row| filter.matches(row)).count()
    }

    /// Row-wise union of several descriptions, in argument order.
    pub fn concat(parts: &[&Description]) -> Description {
        let mut rows = Vec::with_capacity(parts.iter().map(|d| d.len()).sum());
        for part in parts {
            rows.extend_from_slice(&part.rows);
        }
        Description::new(rows)
    }

    /// Rows selected by position, preserving the given order.
    pub fn take(&self, indices: &[usize]) -> Description {
        Description::new(indices.iter().map(|&i| self.rows[i].clone()).collect())
    }

    /// Canonical row ordering plus the permutation that produces it
    /// (`sorted.rows[k] == self.rows[perm[k]]`).
    pub fn sorted(&self) -> (Description, Vec<usize>) {
        let mut perm: Vec<usize> = (0..self.rows.len()).collect();
        perm.sort_by(|&i, &j| self.rows[i].cmp(&self.rows[j]));
        let sorted = self.take(&perm);
        (sorted, perm)
    }
}
