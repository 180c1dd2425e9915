pub mod alerts;

pub use alerts::AlertsUsecase;
