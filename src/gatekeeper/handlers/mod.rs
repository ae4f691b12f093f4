pub mod authorize;
pub use self::authorize::authorize;

pub mod health;
pub use self::health::health;
