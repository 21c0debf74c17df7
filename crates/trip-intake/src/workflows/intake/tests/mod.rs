mod common;

mod payment;
mod routing;
