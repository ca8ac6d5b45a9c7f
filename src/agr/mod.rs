pub mod align;
pub mod embeddings;
pub mod error;
pub mod metrics;
pub mod mfa;
pub mod model;
pub mod preprocess;
pub mod report;
pub mod search;
pub mod similarity;

pub use align::{align_labels, align_labels_with_categories};
pub use error::{AnalysisError, Result};
pub use mfa::reduce_mfa;
pub use report::{ClusteringParams, ClusteringReport, run_clustering};
pub use search::{search_best_clustering, search_best_clustering_with};
pub use similarity::{SimilarityParams, similarity_search};
