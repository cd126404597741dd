pub mod dedup;
pub mod regional;
pub mod seasonal;
pub mod similarity;
pub mod snapshot;
pub mod spatial;
pub mod stats;
pub mod temporal;
pub mod wave;

pub use dedup::{DuplicateMatcher, MatcherParams};
pub use regional::{detect_regional, RegionalHit, RegionalParams};
pub use seasonal::{detect_seasonal, SeasonalHit, SeasonalParams};
pub use similarity::SimilarityWeights;
pub use snapshot::ReportSnapshot;
pub use spatial::{detect_clusters, ClusterParams, SpatialCluster};
pub use stats::{cohens_d, effect_magnitude, significance_score, wilson_interval, WilsonInterval};
pub use temporal::{detect_anomalies, TemporalAnomalyHit, TemporalParams};
pub use wave::{detect_waves, WaveHit, WaveParams};
