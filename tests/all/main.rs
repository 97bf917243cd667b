mod broker;
mod drain;
mod helpers;
