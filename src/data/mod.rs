/// Data layer: export text to measurements and back.
///
/// Architecture:
/// ```text
///  instrument export (.dx)
///        │
///        ▼
///   ┌──────────┐
///   │ splitter │  text → RawBlock per ##TITLE=
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  parser  │  RawBlock → Header + data lines (drop rules applied)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐       ┌─────────────┐
///   │ expander │  ───▶ │ interchange │  Measurement[] ⇄ JSON
///   └──────────┘       └─────────────┘
///        │
///        ▼
///   ┌─────────────┐
///   │ fingerprint │  header subset → SHA-256, input to SCD2
///   └─────────────┘
/// ```

pub mod expander;
pub mod fingerprint;
pub mod interchange;
pub mod model;
pub mod parser;
pub mod splitter;
pub mod validate;
