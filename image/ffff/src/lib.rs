/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    FFFF flash image codec: element table, redundant header pair and the
    flash-wide ROM image.

--*/

mod element;
mod header;
mod romimage;

pub use element::{FfffElement, FfffElementContent};
pub use header::Ffff;
pub use romimage::FfffRomImage;
