#[cfg(test)]
mod display_picture;
#[cfg(test)]
mod file_transfer;
#[cfg(test)]
mod session;
#[cfg(test)]
mod support;
