//! Adapter search, sample demultiplexing and UMI grouping.

mod demultiplex;
mod searcher;
mod signature;

pub use demultiplex::{
    parse_umi_header, DemultiplexParameters, Demultiplexer, ExtractionStatistics,
    GroupingParameters, MigGrouper, SampleBarcode, SampleBarcodes,
};
pub use searcher::{BarcodeParameters, BarcodeSearcher, BarcodeSearcherResult};
pub use signature::{BarcodeError, BarcodeSignature, SignaturePosition};
