use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::CookieJar;
use hebi_token::SessionToken;
use serde::Deserialize;

use crate::LauncherState;
use crate::fedid::Fedid;
use crate::http::HttpError;

/// The user a lifecycle request acts on.
///
/// Resolution precedence: explicit `fedid` query parameter, then the verified
/// session token cookie. The dual mode exists so an administrative caller can
/// act on behalf of a user.
#[derive(Clone)]
pub struct Requester(pub Fedid);

impl FromRequestParts<LauncherState> for Requester {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &LauncherState) -> Result<Self, Self::Rejection> {
        #[derive(Deserialize)]
        struct IdentityQuery {
            fedid: Option<String>,
        }

        let query = parts.uri.query().unwrap_or_default();

        let identity = serde_urlencoded::from_str::<IdentityQuery>(query)
            .unwrap_or(IdentityQuery { fedid: None });

        if let Some(fedid) = identity.fedid {
            let fedid = fedid.parse().map_err(HttpError::bad_request().err())?;
            return Ok(Self(fedid));
        }

        let jar = CookieJar::from_headers(&parts.headers);

        let cookie = jar
            .get(hebi_token::COOKIE_NAME)
            .ok_or_else(|| HttpError::unauthorized().msg("missing session token cookie"))?;

        let conf = state.conf_handle.get_conf();

        let token =
            SessionToken::verify(&conf.jwt_key, cookie.value()).map_err(HttpError::unauthorized().err())?;

        let username = token
            .username()
            .ok_or_else(|| HttpError::unauthorized().msg("token is missing the username claim"))?;

        let fedid = username.parse().map_err(HttpError::bad_request().err())?;

        Ok(Self(fedid))
    }
}
