pub mod aggregator;
pub mod price_buffer;
pub mod swing_detector;

pub use aggregator::BarAggregator;
pub use price_buffer::PriceSeriesBuffer;
pub use swing_detector::{
    DetectorEvent, DetectorState, StructureInvalid, StructureState, SwingStructureDetector,
};
