pub mod skin;
pub mod stub;

pub use skin::SkinToneBackend;
pub use stub::StubBackend;
