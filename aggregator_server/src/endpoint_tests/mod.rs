mod helpers;
mod orders;
mod provider;
