// Pipeline stage declarations.
// Each stage is a separate module reading and writing the fixed file layout.

pub mod check; // Stage 1: validate input files
pub mod network; // Stage 2: build the drivable street graph
pub mod metrics; // Stage 3: connectivity metrics on the graph
pub mod aggregate; // Stage 4: spatial join to block groups + ACS merge
pub mod maps; // Stage 5: choropleths, scatters, correlation table
pub mod models; // Stage 6: baseline OLS regressions
pub mod robustness; // Stage 7: alternative specifications

#[cfg(test)]
pub mod test_fixtures;
