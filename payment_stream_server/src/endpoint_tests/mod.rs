mod helpers;
mod mocks;
mod stream;
mod webhook;
