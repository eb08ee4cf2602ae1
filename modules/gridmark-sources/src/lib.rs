//! Concrete sources: Vast.ai marketplace offers, EIA plant capacity and
//! monthly generation, and scraped GPU pricing pages.

pub mod capacity;
pub mod clients;
pub mod eia;
pub mod error;
pub mod pricing;
pub mod vast;

pub use capacity::{EiaCapacityFetcher, EiaCapacityHandler};
pub use clients::{CapacitySource, GenerationSource, OfferSearch, PageRenderer};
pub use eia::{EiaGenerationFetcher, EiaGenerationHandler};
pub use error::SourceSetupError;
pub use pricing::{PricingHandler, PricingPageFetcher};
pub use vast::{PriceStats, VastOfferFetcher, VastOfferHandler};
