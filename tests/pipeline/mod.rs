mod classify;
mod normalize;
mod service;
