//! Core trait definitions for the sylva workspace.
//!
//! These traits define the contracts that model-state types implement across crates.

/// A type that carries a human-readable name.
pub trait Annotated {
    /// A human-readable name or identifier.
    fn name(&self) -> &str;
}

/// A quantity that can be written to a chain's sample output.
///
/// The sample writer itself lives outside this workspace; it only relies on
/// the header, the formatted value and the number of sub-values.
pub trait Sampleable: Annotated {
    /// Column header for the sample file. Defaults to the name.
    fn sample_header(&self) -> String {
        self.name().to_string()
    }

    /// Current value formatted for the sample file.
    fn sample_value(&self) -> String;

    /// Number of sub-values (1 for scalars).
    fn n_sub_params(&self) -> usize;
}
