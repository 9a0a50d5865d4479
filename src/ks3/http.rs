// KS3 Transport Library for Kingsoft Cloud Object Storage
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Endpoint parsing and request URL construction.

use crate::ks3::error::Error;

/// How bucket and object map onto host and path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressingStyle {
    /// Endpoint is a user CNAME already bound to one bucket; the bucket
    /// never appears in host or path.
    Cname,
    /// Endpoint is an IP literal; bucket goes into the path.
    Ip,
    /// Regular service domain; bucket becomes a subdomain unless
    /// path-style access is forced.
    Virtual,
}

/// Parsed endpoint plus addressing flags. Built once per client.
#[derive(Clone, Debug)]
pub struct BaseUrl {
    scheme: String,
    net_loc: String,
    style: AddressingStyle,
    path_style: bool,
}

impl BaseUrl {
    /// Parses `endpoint` which may carry an `http://` or `https://` prefix
    /// (default `http`), an optional port, and an optional trailing slash.
    pub fn new(
        endpoint: &str,
        is_cname: bool,
        path_style: bool,
    ) -> Result<BaseUrl, Error> {
        let (scheme, net_loc) = if let Some(rest) = endpoint.strip_prefix("http://") {
            ("http", rest)
        } else if let Some(rest) = endpoint.strip_prefix("https://") {
            ("https", rest)
        } else {
            ("http", endpoint)
        };
        let net_loc = net_loc.strip_suffix('/').unwrap_or(net_loc);

        reqwest::Url::parse(&format!("{scheme}://{net_loc}"))
            .map_err(|_| Error::InvalidEndpoint(endpoint.to_string()))?;

        let style = if host_of(net_loc)
            .parse::<std::net::IpAddr>()
            .is_ok()
        {
            AddressingStyle::Ip
        } else if is_cname {
            AddressingStyle::Cname
        } else {
            AddressingStyle::Virtual
        };

        Ok(BaseUrl {
            scheme: scheme.to_string(),
            net_loc: net_loc.to_string(),
            style,
            path_style,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn style(&self) -> AddressingStyle {
        self.style
    }

    /// Maps bucket and object onto `(host, path)`. `object` must already be
    /// escaped with [`escape_object_key`](crate::ks3::params::escape_object_key).
    pub fn build_url(&self, bucket: &str, object: &str) -> (String, String) {
        match self.style {
            AddressingStyle::Cname => (self.net_loc.clone(), format!("/{object}")),
            AddressingStyle::Ip => {
                if bucket.is_empty() {
                    (self.net_loc.clone(), "/".to_string())
                } else {
                    (self.net_loc.clone(), format!("/{bucket}/{object}"))
                }
            }
            AddressingStyle::Virtual => {
                if bucket.is_empty() {
                    (self.net_loc.clone(), "/".to_string())
                } else if self.path_style {
                    (self.net_loc.clone(), format!("/{bucket}/{object}"))
                } else {
                    (format!("{bucket}.{}", self.net_loc), format!("/{object}"))
                }
            }
        }
    }

    /// Builds the full request URL. `query` is the already-serialized query
    /// string, empty for none.
    pub fn make_url(&self, bucket: &str, object: &str, query: &str) -> String {
        let (host, path) = self.build_url(bucket, object);
        if query.is_empty() {
            format!("{}://{host}{path}", self.scheme)
        } else {
            format!("{}://{host}{path}?{query}", self.scheme)
        }
    }
}

/// Strips an optional port or IPv6 brackets off a network location.
fn host_of(net_loc: &str) -> &str {
    if let Some(rest) = net_loc.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match net_loc.rfind(':') {
        // More than one colon and no brackets means a bare IPv6 address.
        Some(i) if net_loc[..i].contains(':') => net_loc,
        Some(i) => &net_loc[..i],
        None => net_loc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_parsing() {
        let b = BaseUrl::new("https://ks3-cn-beijing.ksyuncs.com", false, false).unwrap();
        assert_eq!(b.scheme(), "https");
        let b = BaseUrl::new("ks3-cn-beijing.ksyuncs.com/", false, false).unwrap();
        assert_eq!(b.scheme(), "http");
        assert_eq!(
            b.make_url("", "", ""),
            "http://ks3-cn-beijing.ksyuncs.com/"
        );
    }

    #[test]
    fn test_style_classification() {
        assert_eq!(
            BaseUrl::new("10.1.2.3:8080", false, false).unwrap().style(),
            AddressingStyle::Ip
        );
        assert_eq!(
            BaseUrl::new("[2001:db8::1]:8080", false, false).unwrap().style(),
            AddressingStyle::Ip
        );
        assert_eq!(
            BaseUrl::new("files.example.com", true, false).unwrap().style(),
            AddressingStyle::Cname
        );
        assert_eq!(
            BaseUrl::new("ks3-cn-shanghai.ksyuncs.com", false, false)
                .unwrap()
                .style(),
            AddressingStyle::Virtual
        );
    }

    #[test]
    fn test_virtual_hosted_url() {
        let b = BaseUrl::new("ks3-cn-beijing.ksyuncs.com", false, false).unwrap();
        assert_eq!(
            b.make_url("my-bucket", "docs/a%20b.txt", "acl"),
            "http://my-bucket.ks3-cn-beijing.ksyuncs.com/docs/a%20b.txt?acl"
        );
    }

    #[test]
    fn test_path_style_url() {
        let b = BaseUrl::new("ks3-cn-beijing.ksyuncs.com", false, true).unwrap();
        assert_eq!(
            b.make_url("my-bucket", "obj", ""),
            "http://ks3-cn-beijing.ksyuncs.com/my-bucket/obj"
        );
    }

    #[test]
    fn test_ip_style_url() {
        let b = BaseUrl::new("http://10.0.0.1:9000", false, false).unwrap();
        assert_eq!(
            b.make_url("my-bucket", "obj", ""),
            "http://10.0.0.1:9000/my-bucket/obj"
        );
        assert_eq!(b.make_url("", "", ""), "http://10.0.0.1:9000/");
    }

    #[test]
    fn test_cname_url() {
        let b = BaseUrl::new("https://files.example.com", true, false).unwrap();
        assert_eq!(
            b.make_url("ignored-bucket", "obj", ""),
            "https://files.example.com/obj"
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(BaseUrl::new("", false, false).is_err());
    }
}
