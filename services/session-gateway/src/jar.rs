//! `CookieStore` over the axum-extra cookie jar
//!
//! Writes and deletions accumulate in the jar's delta and are emitted as
//! `Set-Cookie` headers when the jar is returned from the handler. Reads see
//! earlier writes of the same request.

use axum_extra::extract::cookie::{self, Cookie, CookieJar};
use bungie_session::{CookieAttributes, CookieExpiry, CookieStore, SameSite};

pub struct JarStore {
    jar: CookieJar,
    path: String,
}

impl JarStore {
    /// `path` must match the path session cookies are written with, or
    /// deletions will not reach them.
    pub fn new(jar: CookieJar, path: &str) -> Self {
        Self {
            jar,
            path: path.to_owned(),
        }
    }

    pub fn into_jar(self) -> CookieJar {
        self.jar
    }
}

impl CookieStore for JarStore {
    fn get(&self, name: &str) -> Option<String> {
        self.jar.get(name).map(|c| c.value().to_owned())
    }

    fn set(&mut self, name: &str, value: String, attributes: CookieAttributes) {
        let builder = Cookie::build((name.to_owned(), value))
            .http_only(attributes.http_only)
            .secure(attributes.secure)
            .same_site(same_site(attributes.same_site))
            .path(attributes.path);
        let builder = match attributes.expiry {
            CookieExpiry::MaxAge(max_age) => builder.max_age(max_age),
            CookieExpiry::ExpiresAt(at) => builder.expires(at),
        };
        self.jar = std::mem::take(&mut self.jar).add(builder);
    }

    fn delete(&mut self, name: &str) {
        let removal = Cookie::build((name.to_owned(), "")).path(self.path.clone());
        self.jar = std::mem::take(&mut self.jar).remove(removal);
    }
}

fn same_site(value: SameSite) -> cookie::SameSite {
    match value {
        SameSite::Strict => cookie::SameSite::Strict,
        SameSite::Lax => cookie::SameSite::Lax,
        SameSite::None => cookie::SameSite::None,
    }
}
