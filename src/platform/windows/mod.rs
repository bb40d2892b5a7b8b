pub(crate) mod d3d11;
pub(crate) mod duplication;
pub(crate) mod output;
pub(crate) mod pointer;

pub use duplication::DxgiDuplicationSource;
