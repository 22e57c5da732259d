//! Convenience extension traits for addressing fields of loosely-typed
//! documents by dotted paths (`location.city`).

use bson::{ Bson, Document };

/// Path-based access to nested `Document` fields.
#[allow(clippy::stutter)]
pub trait DocumentExt {
    /// Returns the value at the dotted `path`, descending into embedded
    /// documents. Returns `None` if any segment is missing or is not
    /// a document.
    fn get_path(&self, path: &str) -> Option<&Bson>;

    /// Sets the value at the dotted `path`, creating (or replacing
    /// non-document values with) embedded documents as needed.
    fn set_path(&mut self, path: &str, value: Bson);

    /// Copies the `_id` and the listed (possibly dotted) fields into a new
    /// document, omitting fields which are not present.
    fn project<S: AsRef<str>>(&self, fields: &[S]) -> Document;
}

impl DocumentExt for Document {
    fn get_path(&self, path: &str) -> Option<&Bson> {
        let mut segments = path.split('.');
        let first = segments.next()?;

        segments.try_fold(self.get(first)?, |value, segment| match *value {
            Bson::Document(ref doc) => doc.get(segment),
            _ => None,
        })
    }

    fn set_path(&mut self, path: &str, value: Bson) {
        match path.find('.') {
            None => {
                self.insert(path, value);
            }
            Some(dot) => {
                let (head, tail) = (&path[..dot], &path[dot + 1..]);
                let mut inner = match self.remove(head) {
                    Some(Bson::Document(doc)) => doc,
                    _ => Document::new(),
                };
                inner.set_path(tail, value);
                self.insert(head, inner);
            }
        }
    }

    fn project<S: AsRef<str>>(&self, fields: &[S]) -> Document {
        let mut projected = Document::new();

        if let Some(id) = self.get("_id") {
            projected.insert("_id", id.clone());
        }

        for field in fields {
            let field = field.as_ref();

            if let Some(value) = self.get_path(field) {
                projected.set_path(field, value.clone());
            }
        }

        projected
    }
}

#[cfg(test)]
mod tests {
    use bson::Bson;
    use super::DocumentExt;

    #[test]
    fn dotted_paths() {
        let mut d = doc!{
            "name": "Devworks",
            "location": { "city": "Boston", "zipcode": "02118" },
            "careers": ["Web Development", "UI/UX"],
        };

        assert_eq!(d.get_path("name"), Some(&Bson::from("Devworks")));
        assert_eq!(d.get_path("location.city"), Some(&Bson::from("Boston")));
        assert_eq!(d.get_path("location.country"), None);
        assert_eq!(d.get_path("name.first"), None);
        assert_eq!(d.get_path("careers.0"), None);

        d.set_path("location.country", Bson::from("US"));
        d.set_path("name.first", Bson::from("Dev"));
        d.set_path("averageCost", Bson::I64(10_000));

        assert_eq!(d.get_path("location.country"), Some(&Bson::from("US")));
        assert_eq!(d.get_path("location.city"), Some(&Bson::from("Boston")));
        assert_eq!(d.get_path("name.first"), Some(&Bson::from("Dev")));
        assert_eq!(d.get_path("averageCost"), Some(&Bson::I64(10_000)));
    }

    #[test]
    fn projection_keeps_id() {
        let d = doc!{
            "_id": 7_i64,
            "name": "Codemasters",
            "description": "Is coding your passion?",
            "location": { "city": "Kingston", "state": "RI" },
        };

        assert_eq!(d.project(&["name", "location.state", "missing"]), doc!{
            "_id": 7_i64,
            "name": "Codemasters",
            "location": { "state": "RI" },
        });
    }
}
